//! 就诊状态机
//!
//! 管理门诊就诊在流程图中的合法转换

use opd_core::{OpdError, Result, Step, VisitState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 就诊状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum VisitEvent {
    Register,            // entry -> registration
    EmergencyRedirect,   // entry -> EMERGENCY_EXIT
    StartConsultation,   // registration -> consultation
    OrderInvestigations, // consultation -> investigation
    ReviewResults,       // investigation -> results
    BeginDischarge,      // results -> discharge
    Admit,               // discharge -> ADMITTED
    Discharge,           // discharge -> DISCHARGED
    Cancel,              // 任意非终态 -> CANCELLED
}

impl VisitEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::EmergencyRedirect => "emergency_redirect",
            Self::StartConsultation => "start_consultation",
            Self::OrderInvestigations => "order_investigations",
            Self::ReviewResults => "review_results",
            Self::BeginDischarge => "begin_discharge",
            Self::Admit => "admit",
            Self::Discharge => "discharge",
            Self::Cancel => "cancel",
        }
    }

    pub fn all() -> [VisitEvent; 9] {
        [
            Self::Register,
            Self::EmergencyRedirect,
            Self::StartConsultation,
            Self::OrderInvestigations,
            Self::ReviewResults,
            Self::BeginDischarge,
            Self::Admit,
            Self::Discharge,
            Self::Cancel,
        ]
    }
}

impl fmt::Display for VisitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转换守卫条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Always,
    NotEmergency,
    Emergency,
    AdmissionRequired,
    NoAdmission,
}

/// 守卫求值所需的就诊信息
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub is_emergency: bool,
    pub admission_required: Option<bool>,
}

impl Guard {
    fn allows(&self, ctx: &TransitionContext) -> bool {
        match self {
            Self::Always => true,
            Self::NotEmergency => !ctx.is_emergency,
            Self::Emergency => ctx.is_emergency,
            Self::AdmissionRequired => ctx.admission_required == Some(true),
            Self::NoAdmission => ctx.admission_required == Some(false),
        }
    }
}

/// 就诊状态机
#[derive(Debug)]
pub struct VisitStateMachine {
    transitions: HashMap<(Step, VisitEvent), (VisitState, Guard)>,
    allow_cancellation: bool,
}

impl VisitStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则
        transitions.insert(
            (Step::Entry, VisitEvent::Register),
            (VisitState::Active(Step::Registration), Guard::NotEmergency),
        );
        transitions.insert(
            (Step::Entry, VisitEvent::EmergencyRedirect),
            (VisitState::EmergencyExit, Guard::Emergency),
        );
        transitions.insert(
            (Step::Registration, VisitEvent::StartConsultation),
            (VisitState::Active(Step::Consultation), Guard::Always),
        );
        transitions.insert(
            (Step::Consultation, VisitEvent::OrderInvestigations),
            (VisitState::Active(Step::Investigation), Guard::Always),
        );
        transitions.insert(
            (Step::Investigation, VisitEvent::ReviewResults),
            (VisitState::Active(Step::Results), Guard::Always),
        );
        transitions.insert(
            (Step::Results, VisitEvent::BeginDischarge),
            (VisitState::Active(Step::Discharge), Guard::Always),
        );
        transitions.insert(
            (Step::Discharge, VisitEvent::Admit),
            (VisitState::Admitted, Guard::AdmissionRequired),
        );
        transitions.insert(
            (Step::Discharge, VisitEvent::Discharge),
            (VisitState::Discharged, Guard::NoAdmission),
        );

        Self {
            transitions,
            allow_cancellation: true,
        }
    }

    /// 是否允许人工取消就诊
    pub fn with_cancellation(mut self, allow_cancellation: bool) -> Self {
        self.allow_cancellation = allow_cancellation;
        self
    }

    /// 检查状态转换是否有效（含守卫条件）
    pub fn can_transition(&self, from: &VisitState, event: VisitEvent, ctx: &TransitionContext) -> bool {
        self.transition(from, event, ctx).is_ok()
    }

    /// 执行状态转换
    pub fn transition(
        &self,
        from: &VisitState,
        event: VisitEvent,
        ctx: &TransitionContext,
    ) -> Result<VisitState> {
        let step = match from {
            VisitState::Active(step) => *step,
            // 终态吸收一切事件，急诊转出后不可重新进入门诊流程
            terminal => return Err(OpdError::illegal(terminal, event)),
        };

        if event == VisitEvent::Cancel {
            return if self.allow_cancellation {
                Ok(VisitState::Cancelled { at: step })
            } else {
                Err(OpdError::illegal(from, event))
            };
        }

        match self.transitions.get(&(step, event)) {
            Some((to, guard)) if guard.allows(ctx) => Ok(*to),
            _ => Err(OpdError::illegal(from, event)),
        }
    }

    /// 获取当前状态下守卫允许的所有事件
    pub fn get_possible_events(&self, current: &VisitState, ctx: &TransitionContext) -> Vec<VisitEvent> {
        VisitEvent::all()
            .into_iter()
            .filter(|event| self.can_transition(current, *event, ctx))
            .collect()
    }
}

impl Default for VisitStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
