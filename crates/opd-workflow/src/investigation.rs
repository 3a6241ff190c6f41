//! 检查检验
//!
//! 接诊医生开立医嘱（可以为零条）并将就诊推进到 investigation。

use crate::order_ledger::OrderLedger;
use crate::orchestrator::{TransitionRequest, WorkflowOrchestrator};
use crate::state_machine::VisitEvent;
use opd_core::{OpdError, Order, OrderDetails, Result, Step, VisitRecord, VisitState};
use opd_store::RecordStore;
use std::sync::Arc;
use uuid::Uuid;

/// 开立医嘱结果
#[derive(Debug, Clone)]
pub struct InvestigationOutcome {
    pub visit: VisitRecord,
    pub orders: Vec<Order>,
}

/// 检查检验控制器
pub struct InvestigationController {
    store: Arc<dyn RecordStore>,
    ledger: Arc<OrderLedger>,
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl InvestigationController {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<OrderLedger>,
        orchestrator: Arc<WorkflowOrchestrator>,
    ) -> Self {
        Self {
            store,
            ledger,
            orchestrator,
        }
    }

    /// 开立医嘱并进入 investigation
    pub async fn place_orders(&self, visit_id: Uuid, orders: Vec<OrderDetails>) -> Result<InvestigationOutcome> {
        let visit = self.store.get_visit(visit_id).await?;
        match visit.state {
            VisitState::Active(Step::Consultation) => {}
            state if state.is_terminal() => {
                return Err(OpdError::illegal(state, VisitEvent::OrderInvestigations));
            }
            state => {
                return Err(OpdError::stale(
                    format!("visit {}", visit_id),
                    Step::Consultation,
                    state.current_step(),
                ));
            }
        }

        // 先整体校验，避免写入一半
        for details in &orders {
            details.validate()?;
        }

        let mut placed = Vec::with_capacity(orders.len());
        for details in orders {
            let order = self
                .ledger
                .create_order(visit.id, visit.patient_id, details.order_type(), details)
                .await?;
            placed.push(order);
        }

        let visit = self
            .orchestrator
            .transition(TransitionRequest::new(
                visit_id,
                Step::Consultation,
                VisitEvent::OrderInvestigations,
            ))
            .await?;

        tracing::info!("Visit {} moved to investigation with {} orders", visit_id, placed.len());
        Ok(InvestigationOutcome {
            visit,
            orders: placed,
        })
    }
}
