//! 挂号
//!
//! 为分诊后的就诊分配科室和就诊号，并将其送入接诊队列。

use crate::orchestrator::{retry_once_on_stale, TransitionRequest, VisitPatch, WorkflowOrchestrator};
use crate::state_machine::VisitEvent;
use crate::token::QueueEstimator;
use chrono::{Local, Utc};
use opd_core::utils::normalize_department_code;
use opd_core::{RegistrationChannel, Result, Step, VisitRecord, VisitState, VisitStatus};
use opd_store::{RecordStore, VisitQuery};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// 挂号输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub visit_id: Uuid,
    pub department: String,
    pub channel: RegistrationChannel,
}

/// 挂号凭据
#[derive(Debug, Clone)]
pub struct RegistrationReceipt {
    pub visit: VisitRecord,
    pub token_number: String,
    pub queue_position: usize,
    pub estimated_wait_minutes: u32,
}

/// 挂号控制器
pub struct RegistrationController {
    store: Arc<dyn RecordStore>,
    orchestrator: Arc<WorkflowOrchestrator>,
    estimator: QueueEstimator,
}

impl RegistrationController {
    pub fn new(
        store: Arc<dyn RecordStore>,
        orchestrator: Arc<WorkflowOrchestrator>,
        estimator: QueueEstimator,
    ) -> Self {
        Self {
            store,
            orchestrator,
            estimator,
        }
    }

    /// 挂号：entry -> registration（写入就诊号）-> consultation
    ///
    /// 已分配就诊号但停在 registration 的就诊直接沿用原号码和科室继续。
    pub async fn register(&self, request: RegistrationRequest) -> Result<RegistrationReceipt> {
        let department = normalize_department_code(&request.department)?;

        let current = self.store.get_visit(request.visit_id).await?;
        let (token_number, department) = match (current.state, current.token_number, current.department) {
            (VisitState::Active(Step::Registration), Some(token), Some(assigned)) => {
                if assigned != department {
                    tracing::warn!(
                        "Visit {} already registered in {}, ignoring requested {}",
                        request.visit_id,
                        assigned,
                        department
                    );
                }
                tracing::info!("Resuming registration of visit {} with token {}", request.visit_id, token);
                (token, assigned)
            }
            _ => {
                let registered =
                    retry_once_on_stale(|| self.assign_token(request.visit_id, &department, request.channel))
                        .await?;
                (registered.token_number.unwrap_or_default(), department)
            }
        };

        let visit = self
            .orchestrator
            .transition(TransitionRequest::new(
                request.visit_id,
                Step::Registration,
                VisitEvent::StartConsultation,
            ))
            .await?;

        let queue_position = self.consultation_queue_ahead(&department, visit.id).await?;
        let estimated_wait_minutes = self.estimator.estimate_wait(queue_position);

        tracing::info!(
            "Registered visit {} in {} with token {} (position {}, ~{} min)",
            visit.id,
            department,
            token_number,
            queue_position,
            estimated_wait_minutes
        );

        Ok(RegistrationReceipt {
            visit,
            token_number,
            queue_position,
            estimated_wait_minutes,
        })
    }

    async fn assign_token(
        &self,
        visit_id: Uuid,
        department: &str,
        channel: RegistrationChannel,
    ) -> Result<VisitRecord> {
        // 读取排队长度与提交之间不加锁，并发挂号可能得到相同序号
        let queue_length = self.registered_today(department).await?;
        let token_number = self.estimator.next_token(department, queue_length)?;

        self.orchestrator
            .transition(
                TransitionRequest::new(visit_id, Step::Entry, VisitEvent::Register).with_patch(VisitPatch {
                    token_number: Some(token_number),
                    department: Some(department.to_string()),
                    registration_channel: Some(channel),
                    registered_at: Some(Utc::now()),
                    ..Default::default()
                }),
            )
            .await
    }

    /// 科室今日已挂号数量
    pub async fn registered_today(&self, department: &str) -> Result<usize> {
        let visits = self
            .store
            .query_visits(&VisitQuery {
                department: Some(department.to_string()),
                registered_on: Some(Local::now().date_naive()),
                ..Default::default()
            })
            .await?;
        Ok(visits.len())
    }

    /// 在本就诊之前等待接诊的人数
    async fn consultation_queue_ahead(&self, department: &str, visit_id: Uuid) -> Result<usize> {
        let mut waiting = self
            .store
            .query_visits(&VisitQuery {
                step: Some(Step::Consultation),
                status: Some(VisitStatus::InProgress),
                department: Some(department.to_string()),
                ..Default::default()
            })
            .await?;
        waiting.sort_by_key(|visit| visit.registered_at);
        Ok(waiting
            .iter()
            .take_while(|visit| visit.id != visit_id)
            .count())
    }
}
