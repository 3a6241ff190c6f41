//! 入口/分诊
//!
//! 为新到达的患者创建就诊记录。急诊患者立即转出门诊流程，其余患者进入挂号队列。

use crate::orchestrator::{TransitionRequest, WorkflowOrchestrator};
use crate::state_machine::VisitEvent;
use opd_core::utils::require_text;
use opd_core::{Result, Step, VisitRecord};
use opd_store::{PatientDirectory, RecordStore};
use std::sync::Arc;
use uuid::Uuid;

/// 分诊输入
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub patient_id: Uuid,
    pub is_emergency: bool,
    pub triage_notes: String,
}

/// 分诊结果
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    /// 等待挂号
    AwaitingRegistration(VisitRecord),
    /// 已转交急诊，不再进入门诊流程
    EmergencyRedirected(VisitRecord),
}

impl EntryOutcome {
    pub fn visit(&self) -> &VisitRecord {
        match self {
            Self::AwaitingRegistration(visit) | Self::EmergencyRedirected(visit) => visit,
        }
    }
}

/// 入口/分诊控制器
pub struct EntryTriageController {
    store: Arc<dyn RecordStore>,
    patients: Arc<dyn PatientDirectory>,
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl EntryTriageController {
    pub fn new(
        store: Arc<dyn RecordStore>,
        patients: Arc<dyn PatientDirectory>,
        orchestrator: Arc<WorkflowOrchestrator>,
    ) -> Self {
        Self {
            store,
            patients,
            orchestrator,
        }
    }

    /// 登记到达并创建就诊记录
    pub async fn open_visit(&self, request: EntryRequest) -> Result<EntryOutcome> {
        require_text("triage notes", &request.triage_notes)?;
        let patient = self.patients.get_patient(request.patient_id).await?;

        let visit = self
            .store
            .insert_visit(VisitRecord::new(
                patient.id,
                request.is_emergency,
                request.triage_notes.trim().to_string(),
            ))
            .await?;
        tracing::info!(
            "Opened visit {} for patient {} (emergency: {})",
            visit.id,
            patient.id,
            visit.is_emergency
        );

        if !visit.is_emergency {
            return Ok(EntryOutcome::AwaitingRegistration(visit));
        }

        let redirected = self
            .orchestrator
            .transition(TransitionRequest::new(visit.id, Step::Entry, VisitEvent::EmergencyRedirect))
            .await?;
        Ok(EntryOutcome::EmergencyRedirected(redirected))
    }
}
