//! 结果审核
//!
//! 所有未取消的医嘱完成后才能进入 results。界面可以人工放行，但审核时的
//! 完成情况无论如何都会记录在就诊上。

use crate::order_ledger::OrderLedger;
use crate::orchestrator::{TransitionRequest, VisitPatch, WorkflowOrchestrator};
use crate::state_machine::VisitEvent;
use chrono::Utc;
use opd_core::{OpdError, Order, Result, ResultsReview, Step, VisitRecord};
use std::sync::Arc;
use uuid::Uuid;

/// 结果审核输出
#[derive(Debug, Clone)]
pub struct ResultsOutcome {
    pub visit: VisitRecord,
    pub review: ResultsReview,
    pub pending_orders: Vec<Order>,
}

/// 结果审核控制器
pub struct ResultsController {
    ledger: Arc<OrderLedger>,
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl ResultsController {
    pub fn new(ledger: Arc<OrderLedger>, orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { ledger, orchestrator }
    }

    /// 审核结果并进入 results
    pub async fn review(&self, visit_id: Uuid, manual_override: bool) -> Result<ResultsOutcome> {
        let all_orders_completed = self.ledger.all_completed(visit_id).await?;
        let pending_orders = self.ledger.pending_orders(visit_id).await?;

        if !all_orders_completed && !manual_override {
            return Err(OpdError::Validation(format!(
                "visit {} has {} orders not completed",
                visit_id,
                pending_orders.len()
            )));
        }
        if !all_orders_completed {
            tracing::warn!(
                "Results for visit {} released manually with {} pending orders",
                visit_id,
                pending_orders.len()
            );
        }

        let review = ResultsReview {
            all_orders_completed,
            pending_orders: pending_orders.len(),
            manual_override,
            reviewed_at: Utc::now(),
        };

        let visit = self
            .orchestrator
            .transition(
                TransitionRequest::new(visit_id, Step::Investigation, VisitEvent::ReviewResults).with_patch(
                    VisitPatch {
                        results_review: Some(review.clone()),
                        ..Default::default()
                    },
                ),
            )
            .await?;

        Ok(ResultsOutcome {
            visit,
            review,
            pending_orders,
        })
    }
}
