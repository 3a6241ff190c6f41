//! 患者目录
//!
//! 工作流只读取患者身份信息，从不修改。

use async_trait::async_trait;
use opd_core::{OpdError, Patient, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 患者目录查询接口
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    /// 按ID查询患者
    async fn get_patient(&self, patient_id: Uuid) -> Result<Patient>;

    /// 按姓名、电话或病历号搜索
    async fn search(&self, term: &str) -> Result<Vec<Patient>>;
}

/// 内存患者目录
#[derive(Debug, Default)]
pub struct InMemoryPatientDirectory {
    patients: RwLock<HashMap<Uuid, Patient>>,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用已有患者数据初始化目录
    pub fn with_patients(patients: impl IntoIterator<Item = Patient>) -> Self {
        Self {
            patients: RwLock::new(patients.into_iter().map(|p| (p.id, p)).collect()),
        }
    }
}

#[async_trait]
impl PatientDirectory for InMemoryPatientDirectory {
    async fn get_patient(&self, patient_id: Uuid) -> Result<Patient> {
        let patients = self.patients.read().await;
        patients
            .get(&patient_id)
            .cloned()
            .ok_or_else(|| OpdError::NotFound(format!("Patient {} not found", patient_id)))
    }

    async fn search(&self, term: &str) -> Result<Vec<Patient>> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Err(OpdError::Validation("search term is required".to_string()));
        }

        let patients = self.patients.read().await;
        let mut matches: Vec<Patient> = patients
            .values()
            .filter(|p| {
                p.name.to_lowercase().contains(&term)
                    || p.mrn.to_lowercase() == term
                    || p.phone.as_deref().map(|phone| phone.contains(&term)).unwrap_or(false)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matches)
    }
}
