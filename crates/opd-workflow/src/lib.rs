//! # 门诊工作流模块
//!
//! 提供门诊就诊的完整流程管理，包括：
//! - 就诊状态机：入口/分诊 → 挂号 → 接诊 → 检查检验 → 结果 → 离院，含急诊转出与住院分支
//! - 工作流编排器：唯一的步骤/状态写入方，带乐观前置条件
//! - 医嘱台账：药品、检验、影像、操作医嘱的独立生命周期
//! - 就诊号与候诊时间估算

pub mod discharge;
pub mod engine;
pub mod handoff;
pub mod investigation;
pub mod orchestrator;
pub mod order_ledger;
pub mod registration;
pub mod results;
pub mod state_machine;
pub mod token;
pub mod triage;

// 重新导出主要类型
pub use discharge::{DischargeController, DischargeDecision, DischargeOutcome};
pub use engine::{QueueOverview, WorkflowEngine, WorkflowSettings};
pub use handoff::{ChannelHandoff, HandoffMessage, HandoffSink, HandoffTarget, LoggingHandoff};
pub use investigation::{InvestigationController, InvestigationOutcome};
pub use orchestrator::{retry_once_on_stale, TransitionRequest, VisitPatch, WorkflowOrchestrator};
pub use order_ledger::{OrderLedger, OrderStats};
pub use registration::{RegistrationController, RegistrationReceipt, RegistrationRequest};
pub use results::{ResultsController, ResultsOutcome};
pub use state_machine::{TransitionContext, VisitEvent, VisitStateMachine};
pub use token::{estimate_wait, next_token, QueueEstimator};
pub use triage::{EntryOutcome, EntryRequest, EntryTriageController};
