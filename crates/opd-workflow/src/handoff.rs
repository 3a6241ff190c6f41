//! 外部工作流交接
//!
//! 急诊转出和收住院都是单向交接，不建模回传通道。

use async_trait::async_trait;
use opd_core::{OpdError, Result, VisitRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// 交接目标
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HandoffTarget {
    Emergency, // 急诊工作流
    Inpatient, // 住院工作流
}

impl HandoffTarget {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Emergency => "opd.emergency_exit",
            Self::Inpatient => "opd.admission",
        }
    }
}

/// 交接消息封装
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffMessage {
    pub id: Uuid,
    pub target: HandoffTarget,
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

impl HandoffMessage {
    /// 以就诊记录快照作为消息体
    pub fn from_visit(target: HandoffTarget, visit: &VisitRecord) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            target,
            visit_id: visit.id,
            patient_id: visit.patient_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(visit)?,
        })
    }
}

/// 交接接收方
#[async_trait]
pub trait HandoffSink: Send + Sync {
    async fn hand_off(&self, message: HandoffMessage) -> Result<()>;
}

/// 基于通道的交接，接收端由外部工作流消费
#[derive(Debug, Clone)]
pub struct ChannelHandoff {
    sender: mpsc::UnboundedSender<HandoffMessage>,
}

impl ChannelHandoff {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HandoffMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl HandoffSink for ChannelHandoff {
    async fn hand_off(&self, message: HandoffMessage) -> Result<()> {
        let target = message.target;
        self.sender
            .send(message)
            .map_err(|_| OpdError::Handoff(format!("{} receiver closed", target.as_str())))
    }
}

/// 仅记录日志的交接
#[derive(Debug, Clone, Default)]
pub struct LoggingHandoff;

#[async_trait]
impl HandoffSink for LoggingHandoff {
    async fn hand_off(&self, message: HandoffMessage) -> Result<()> {
        tracing::info!(
            "Handoff {} for visit {} (patient {})",
            message.target.as_str(),
            message.visit_id,
            message.patient_id
        );
        Ok(())
    }
}
