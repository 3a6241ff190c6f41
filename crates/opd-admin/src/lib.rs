//! # 门诊运维模块
//!
//! 提供配置加载、校验与持久化，以及日志初始化

pub mod config;
pub mod logging;

pub use config::{ConfigManager, ConfigValidator, LoggingConfig, OpdConfig, StoreConfig, WorkflowConfig};
pub use logging::{build_filter, init_logging};
