//! 错误定义模块

use std::fmt::Display;
use thiserror::Error;

/// 门诊工作流统一错误类型
#[derive(Error, Debug)]
pub enum OpdError {
    #[error("验证错误: {0}")]
    Validation(String),

    #[error("非法状态转换: 从 {from} 经 {event}")]
    IllegalTransition { from: String, event: String },

    #[error("状态已过期: {entity} 期望 {expected}, 实际 {actual}")]
    StaleState {
        entity: String,
        expected: String,
        actual: String,
    },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("存储错误: {0}")]
    Store(String),

    #[error("交接错误: {0}")]
    Handoff(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OpdError {
    pub fn illegal(from: impl Display, event: impl Display) -> Self {
        Self::IllegalTransition {
            from: from.to_string(),
            event: event.to_string(),
        }
    }

    pub fn stale(entity: impl Display, expected: impl Display, actual: impl Display) -> Self {
        Self::StaleState {
            entity: entity.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// 乐观前置条件冲突，调用方重新读取后最多自动重试一次
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleState { .. })
    }
}

/// 门诊工作流统一结果类型
pub type Result<T> = std::result::Result<T, OpdError>;
