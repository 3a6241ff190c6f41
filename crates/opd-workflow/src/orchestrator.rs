//! 工作流编排器
//!
//! 就诊 `current_step`/`status` 的唯一写入方。每个转换请求都必须声明它期望的
//! 当前步骤，实际步骤不符时返回 StaleState，不做覆盖。

use crate::handoff::{HandoffMessage, HandoffSink, HandoffTarget};
use crate::state_machine::{TransitionContext, VisitEvent, VisitStateMachine};
use chrono::{DateTime, Utc};
use opd_core::{
    DischargeSummary, OpdError, RegistrationChannel, Result, ResultsReview, Step,
    TransitionRecord, VisitRecord, VisitState,
};
use opd_store::{OrderQuery, RecordStore, VisitCommit};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// 随转换一起写入的步骤数据，不包含步骤和状态本身
#[derive(Debug, Clone, Default)]
pub struct VisitPatch {
    pub token_number: Option<String>,
    pub department: Option<String>,
    pub registration_channel: Option<RegistrationChannel>,
    pub registered_at: Option<DateTime<Utc>>,
    pub admission_required: Option<bool>,
    pub results_review: Option<ResultsReview>,
    pub discharge_summary: Option<DischargeSummary>,
    pub note: Option<String>,
}

/// 转换请求
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub visit_id: Uuid,
    pub expected_step: Step,
    pub event: VisitEvent,
    pub patch: VisitPatch,
}

impl TransitionRequest {
    pub fn new(visit_id: Uuid, expected_step: Step, event: VisitEvent) -> Self {
        Self {
            visit_id,
            expected_step,
            event,
            patch: VisitPatch::default(),
        }
    }

    pub fn with_patch(mut self, patch: VisitPatch) -> Self {
        self.patch = patch;
        self
    }
}

/// 工作流编排器
pub struct WorkflowOrchestrator {
    store: Arc<dyn RecordStore>,
    state_machine: VisitStateMachine,
    emergency: Arc<dyn HandoffSink>,
    inpatient: Arc<dyn HandoffSink>,
}

impl WorkflowOrchestrator {
    /// 创建新的编排器
    pub fn new(
        store: Arc<dyn RecordStore>,
        state_machine: VisitStateMachine,
        emergency: Arc<dyn HandoffSink>,
        inpatient: Arc<dyn HandoffSink>,
    ) -> Self {
        Self {
            store,
            state_machine,
            emergency,
            inpatient,
        }
    }

    /// 校验并提交一次转换
    pub async fn transition(&self, request: TransitionRequest) -> Result<VisitRecord> {
        let TransitionRequest {
            visit_id,
            expected_step,
            event,
            mut patch,
        } = request;

        let visit = self.store.get_visit(visit_id).await?;
        let from = visit.state;

        if from.is_terminal() {
            tracing::warn!("Rejected {} on visit {}: already {}", event, visit_id, from);
            return Err(OpdError::illegal(from, event));
        }

        if visit.current_step() != expected_step {
            tracing::warn!(
                "Stale transition {} on visit {}: expected {}, actual {}",
                event,
                visit_id,
                expected_step,
                visit.current_step()
            );
            return Err(OpdError::stale(
                format!("visit {}", visit_id),
                expected_step,
                visit.current_step(),
            ));
        }

        let ctx = TransitionContext {
            is_emergency: visit.is_emergency,
            admission_required: patch.admission_required.or(visit.admission_required),
        };
        let to = self.state_machine.transition(&from, event, &ctx).map_err(|e| {
            tracing::warn!("Rejected {} on visit {} at {}", event, visit_id, from);
            e
        })?;

        if event == VisitEvent::ReviewResults {
            let review = self.check_results_gate(visit_id, patch.results_review.take()).await?;
            patch.results_review = Some(review);
        }

        let mut updated = visit;
        let discharge_summary = apply_patch(&mut updated, event, patch.clone())?;
        updated.state = to;
        updated.history.push(TransitionRecord {
            from,
            to,
            event: event.to_string(),
            note: patch.note,
            at: Utc::now(),
        });

        let committed = self
            .store
            .commit_visit(
                VisitCommit {
                    visit: updated,
                    discharge_summary,
                },
                from,
            )
            .await?;

        tracing::info!("Visit {} transitioned {} -> {} via {}", visit_id, from, to, event);

        match to {
            VisitState::EmergencyExit => {
                tracing::warn!("Visit {} redirected to emergency workflow", visit_id);
                self.hand_off(HandoffTarget::Emergency, &committed).await;
            }
            VisitState::Admitted => self.hand_off(HandoffTarget::Inpatient, &committed).await,
            _ => {}
        }

        Ok(committed)
    }

    /// 结果门禁：医嘱未全部结束时只有人工放行才能进入结果确认。
    /// 完成情况以台账为准，覆盖调用方提交的统计。
    async fn check_results_gate(&self, visit_id: Uuid, review: Option<ResultsReview>) -> Result<ResultsReview> {
        let review = review.ok_or_else(|| {
            OpdError::Validation(format!("visit {} cannot leave investigation without a results review", visit_id))
        })?;

        let orders = self.store.query_orders(&OrderQuery::for_visit(visit_id)).await?;
        let pending_orders = orders.iter().filter(|o| o.status.is_open()).count();
        let all_orders_completed = pending_orders == 0;

        if !all_orders_completed && !review.manual_override {
            tracing::warn!("Results gate closed for visit {}: {} orders pending", visit_id, pending_orders);
            return Err(OpdError::Validation(format!(
                "visit {} has {} pending orders and no manual override",
                visit_id, pending_orders
            )));
        }

        Ok(ResultsReview {
            all_orders_completed,
            pending_orders,
            ..review
        })
    }

    /// 交接在转换提交之后进行，失败只记录日志，已提交的状态不回滚
    async fn hand_off(&self, target: HandoffTarget, visit: &VisitRecord) {
        let sink = match target {
            HandoffTarget::Emergency => &self.emergency,
            HandoffTarget::Inpatient => &self.inpatient,
        };

        let result = match HandoffMessage::from_visit(target, visit) {
            Ok(message) => sink.hand_off(message).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::error!("Handoff {} failed for visit {}: {}", target.as_str(), visit.id, e);
        }
    }

    /// 获取就诊当前可执行的事件
    pub async fn possible_events(&self, visit_id: Uuid) -> Result<Vec<VisitEvent>> {
        let visit = self.store.get_visit(visit_id).await?;
        let ctx = TransitionContext {
            is_emergency: visit.is_emergency,
            admission_required: visit.admission_required,
        };
        let mut events = self.state_machine.get_possible_events(&visit.state, &ctx);

        // 离院分支由本次决定提供，尚未记录时两条分支都可选
        if visit.state == VisitState::Active(Step::Discharge) && visit.admission_required.is_none() {
            events.extend([VisitEvent::Admit, VisitEvent::Discharge]);
            events.sort();
        }
        Ok(events)
    }

}

/// 校验并写入各事件允许携带的数据，返回需要同时提交的出院小结
fn apply_patch(
    visit: &mut VisitRecord,
    event: VisitEvent,
    patch: VisitPatch,
) -> Result<Option<DischargeSummary>> {
    let writes_registration = patch.token_number.is_some()
        || patch.department.is_some()
        || patch.registration_channel.is_some()
        || patch.registered_at.is_some();

    if writes_registration {
        if event != VisitEvent::Register {
            return Err(not_writable("registration data", event));
        }
        if visit.token_number.is_some() {
            return Err(OpdError::Validation(format!(
                "visit {} already has token {}",
                visit.id,
                visit.token_number.as_deref().unwrap_or_default()
            )));
        }
    }
    if event == VisitEvent::Register && (patch.token_number.is_none() || patch.department.is_none()) {
        return Err(OpdError::Validation(
            "registration requires a token number and department".to_string(),
        ));
    }

    if patch.admission_required.is_some() {
        if !matches!(event, VisitEvent::Admit | VisitEvent::Discharge) {
            return Err(not_writable("admission decision", event));
        }
        if visit.admission_required.is_some() {
            return Err(OpdError::illegal(visit.state, "revise admission decision"));
        }
    }

    if patch.results_review.is_some() && event != VisitEvent::ReviewResults {
        return Err(not_writable("results review", event));
    }

    match (&patch.discharge_summary, event) {
        (Some(summary), VisitEvent::Discharge) => {
            if summary.admission_required || summary.visit_id != visit.id {
                return Err(OpdError::Validation(
                    "discharge summary does not match this visit".to_string(),
                ));
            }
        }
        (Some(_), other) => return Err(not_writable("discharge summary", other)),
        (None, VisitEvent::Discharge) => {
            return Err(OpdError::Validation("discharge requires a discharge summary".to_string()));
        }
        (None, _) => {}
    }

    if patch.token_number.is_some() {
        visit.token_number = patch.token_number;
    }
    if patch.department.is_some() {
        visit.department = patch.department;
    }
    if patch.registration_channel.is_some() {
        visit.registration_channel = patch.registration_channel;
    }
    if patch.registered_at.is_some() {
        visit.registered_at = patch.registered_at;
    }
    if patch.admission_required.is_some() {
        visit.admission_required = patch.admission_required;
    }
    if patch.results_review.is_some() {
        visit.results_review = patch.results_review;
    }

    Ok(patch.discharge_summary)
}

fn not_writable(field: &str, event: VisitEvent) -> OpdError {
    OpdError::Validation(format!("{} cannot be written during {}", field, event))
}

/// 乐观冲突时重新执行一次；操作本身负责重新读取最新状态，
/// 再次冲突则交给调用方处理
pub async fn retry_once_on_stale<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(e) if e.is_stale() => {
            tracing::warn!("Retrying after stale state: {}", e);
            op().await
        }
        other => other,
    }
}
