//! 离院决定
//!
//! 是否收住院只能决定一次：收住院则交接住院工作流，否则生成出院小结并离院。

use crate::orchestrator::{TransitionRequest, VisitPatch, WorkflowOrchestrator};
use crate::state_machine::VisitEvent;
use chrono::Utc;
use opd_core::utils::require_text;
use opd_core::{DischargeSummary, Result, Step, VisitRecord, VisitState};
use opd_store::RecordStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// 离院决定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DischargeDecision {
    Admit,
    Discharge {
        discharge_diagnosis: String,
        treatment_summary: String,
        special_instructions: Option<String>,
    },
}

/// 离院结果
#[derive(Debug, Clone)]
pub enum DischargeOutcome {
    Admitted(VisitRecord),
    Discharged {
        visit: VisitRecord,
        summary: DischargeSummary,
    },
}

impl DischargeOutcome {
    pub fn visit(&self) -> &VisitRecord {
        match self {
            Self::Admitted(visit) => visit,
            Self::Discharged { visit, .. } => visit,
        }
    }
}

/// 离院控制器
pub struct DischargeController {
    store: Arc<dyn RecordStore>,
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl DischargeController {
    pub fn new(store: Arc<dyn RecordStore>, orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { store, orchestrator }
    }

    /// 记录离院决定：results -> discharge -> ADMITTED / DISCHARGED
    pub async fn decide(&self, visit_id: Uuid, decision: DischargeDecision) -> Result<DischargeOutcome> {
        if let DischargeDecision::Discharge {
            discharge_diagnosis,
            treatment_summary,
            ..
        } = &decision
        {
            require_text("discharge diagnosis", discharge_diagnosis)?;
            require_text("treatment summary", treatment_summary)?;
        }

        // 上次在两次提交之间中断的就诊已停在 discharge，直接继续
        let visit = self.store.get_visit(visit_id).await?;
        if visit.state != VisitState::Active(Step::Discharge) {
            self.orchestrator
                .transition(TransitionRequest::new(visit_id, Step::Results, VisitEvent::BeginDischarge))
                .await?;
        }

        match decision {
            DischargeDecision::Admit => {
                let visit = self
                    .orchestrator
                    .transition(
                        TransitionRequest::new(visit_id, Step::Discharge, VisitEvent::Admit).with_patch(
                            VisitPatch {
                                admission_required: Some(true),
                                ..Default::default()
                            },
                        ),
                    )
                    .await?;
                tracing::info!("Visit {} admitted", visit_id);
                Ok(DischargeOutcome::Admitted(visit))
            }
            DischargeDecision::Discharge {
                discharge_diagnosis,
                treatment_summary,
                special_instructions,
            } => {
                let summary = DischargeSummary {
                    id: Uuid::new_v4(),
                    visit_id,
                    admission_required: false,
                    discharge_diagnosis: discharge_diagnosis.trim().to_string(),
                    treatment_summary: treatment_summary.trim().to_string(),
                    special_instructions: special_instructions.filter(|s| !s.trim().is_empty()),
                    created_at: Utc::now(),
                };

                let visit = self
                    .orchestrator
                    .transition(
                        TransitionRequest::new(visit_id, Step::Discharge, VisitEvent::Discharge).with_patch(
                            VisitPatch {
                                admission_required: Some(false),
                                discharge_summary: Some(summary.clone()),
                                ..Default::default()
                            },
                        ),
                    )
                    .await?;
                tracing::info!("Visit {} discharged", visit_id);
                Ok(DischargeOutcome::Discharged { visit, summary })
            }
        }
    }
}
