//! 工作流引擎
//!
//! 组装编排器、医嘱台账、各步骤控制器和候诊估算器的统一入口

use crate::discharge::DischargeController;
use crate::handoff::HandoffSink;
use crate::investigation::InvestigationController;
use crate::order_ledger::OrderLedger;
use crate::orchestrator::{TransitionRequest, WorkflowOrchestrator};
use crate::registration::RegistrationController;
use crate::results::ResultsController;
use crate::state_machine::{VisitEvent, VisitStateMachine};
use crate::token::{QueueEstimator, DEFAULT_MINUTES_PER_PATIENT};
use crate::triage::EntryTriageController;
use opd_core::{Result, Step, VisitRecord, VisitStatus};
use opd_store::{ChangeEvent, PatientDirectory, RecordStore, VisitQuery};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// 引擎运行参数
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub minutes_per_patient: u32,
    pub allow_cancellation: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            minutes_per_patient: DEFAULT_MINUTES_PER_PATIENT,
            allow_cancellation: true,
        }
    }
}

/// 候诊概览，供叫号屏等显示使用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueOverview {
    pub visits_by_step: BTreeMap<Step, usize>,
    pub awaiting_registration: usize,
    pub consultation_queue_by_department: BTreeMap<String, usize>,
    pub estimated_wait_by_department: BTreeMap<String, u32>,
    pub total_active_visits: usize,
}

/// 门诊工作流引擎
pub struct WorkflowEngine {
    store: Arc<dyn RecordStore>,
    orchestrator: Arc<WorkflowOrchestrator>,
    ledger: Arc<OrderLedger>,
    estimator: QueueEstimator,
    triage: EntryTriageController,
    registration: RegistrationController,
    investigation: InvestigationController,
    results: ResultsController,
    discharge: DischargeController,
}

impl WorkflowEngine {
    /// 创建新的工作流引擎
    pub fn new(
        store: Arc<dyn RecordStore>,
        patients: Arc<dyn PatientDirectory>,
        emergency: Arc<dyn HandoffSink>,
        inpatient: Arc<dyn HandoffSink>,
        settings: WorkflowSettings,
    ) -> Self {
        let state_machine = VisitStateMachine::new().with_cancellation(settings.allow_cancellation);
        let orchestrator = Arc::new(WorkflowOrchestrator::new(
            store.clone(),
            state_machine,
            emergency,
            inpatient,
        ));
        let ledger = Arc::new(OrderLedger::new(store.clone()));
        let estimator = QueueEstimator::with_minutes_per_patient(settings.minutes_per_patient);

        Self {
            triage: EntryTriageController::new(store.clone(), patients, orchestrator.clone()),
            registration: RegistrationController::new(store.clone(), orchestrator.clone(), estimator),
            investigation: InvestigationController::new(store.clone(), ledger.clone(), orchestrator.clone()),
            results: ResultsController::new(ledger.clone(), orchestrator.clone()),
            discharge: DischargeController::new(store.clone(), orchestrator.clone()),
            store,
            orchestrator,
            ledger,
            estimator,
        }
    }

    /// 获取就诊记录
    pub async fn visit(&self, visit_id: Uuid) -> Result<VisitRecord> {
        self.store.get_visit(visit_id).await
    }

    /// 人工取消就诊，同时取消其未完成的医嘱
    pub async fn cancel_visit(&self, visit_id: Uuid, expected_step: Step, reason: &str) -> Result<VisitRecord> {
        let mut request = TransitionRequest::new(visit_id, expected_step, VisitEvent::Cancel);
        request.patch.note = Some(reason.to_string());

        let visit = self.orchestrator.transition(request).await?;
        // 就诊已取消，医嘱级联失败只记录，不影响取消结果
        let cancelled_orders = match self.ledger.cancel_open_orders(visit_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("Failed to cascade cancellation of visit {} to its orders: {}", visit_id, e);
                0
            }
        };

        tracing::info!(
            "Visit {} cancelled at {} ({} open orders cancelled): {}",
            visit_id,
            expected_step,
            cancelled_orders,
            reason
        );
        Ok(visit)
    }

    /// 获取候诊概览
    pub async fn queue_overview(&self) -> Result<QueueOverview> {
        let active = self
            .store
            .query_visits(&VisitQuery {
                status: Some(VisitStatus::InProgress),
                ..Default::default()
            })
            .await?;

        let mut visits_by_step: BTreeMap<Step, usize> = Step::all().into_iter().map(|s| (s, 0)).collect();
        let mut consultation_queue_by_department = BTreeMap::new();

        for visit in &active {
            *visits_by_step.entry(visit.current_step()).or_insert(0) += 1;

            if visit.current_step() == Step::Consultation {
                if let Some(department) = &visit.department {
                    *consultation_queue_by_department.entry(department.clone()).or_insert(0) += 1;
                }
            }
        }

        let estimated_wait_by_department = consultation_queue_by_department
            .iter()
            .map(|(department, waiting)| (department.clone(), self.estimator.estimate_wait(*waiting)))
            .collect();

        Ok(QueueOverview {
            awaiting_registration: visits_by_step.get(&Step::Entry).copied().unwrap_or(0),
            visits_by_step,
            consultation_queue_by_department,
            estimated_wait_by_department,
            total_active_visits: active.len(),
        })
    }

    /// 订阅存储变更
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.subscribe()
    }

    /// 获取分诊控制器
    pub fn triage(&self) -> &EntryTriageController {
        &self.triage
    }

    /// 获取挂号控制器
    pub fn registration(&self) -> &RegistrationController {
        &self.registration
    }

    /// 获取检查检验控制器
    pub fn investigation(&self) -> &InvestigationController {
        &self.investigation
    }

    /// 获取结果审核控制器
    pub fn results(&self) -> &ResultsController {
        &self.results
    }

    /// 获取离院控制器
    pub fn discharge(&self) -> &DischargeController {
        &self.discharge
    }

    /// 获取编排器实例
    pub fn orchestrator(&self) -> &Arc<WorkflowOrchestrator> {
        &self.orchestrator
    }

    /// 获取医嘱台账实例
    pub fn ledger(&self) -> &Arc<OrderLedger> {
        &self.ledger
    }

    /// 获取候诊估算器
    pub fn estimator(&self) -> &QueueEstimator {
        &self.estimator
    }
}
