//! 存储查询模型

use chrono::{Local, NaiveDate};
use opd_core::models::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 就诊查询条件，所有字段为等值过滤
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitQuery {
    pub patient_id: Option<Uuid>,
    pub step: Option<Step>,
    pub status: Option<VisitStatus>,
    pub department: Option<String>,
    pub registered_on: Option<NaiveDate>, // 按本地日期
    pub is_emergency: Option<bool>,
}

impl VisitQuery {
    pub fn matches(&self, visit: &VisitRecord) -> bool {
        if let Some(patient_id) = self.patient_id {
            if visit.patient_id != patient_id {
                return false;
            }
        }

        if let Some(step) = self.step {
            if visit.current_step() != step {
                return false;
            }
        }

        if let Some(status) = self.status {
            if visit.status() != status {
                return false;
            }
        }

        if let Some(department) = &self.department {
            if visit.department.as_deref() != Some(department.as_str()) {
                return false;
            }
        }

        if let Some(date) = self.registered_on {
            let registered_on = visit
                .registered_at
                .map(|at| at.with_timezone(&Local).date_naive());
            if registered_on != Some(date) {
                return false;
            }
        }

        if let Some(is_emergency) = self.is_emergency {
            if visit.is_emergency != is_emergency {
                return false;
            }
        }

        true
    }
}

/// 医嘱写入时对所属就诊状态的要求
pub type VisitGuard = fn(&VisitState) -> bool;

/// 医嘱查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderQuery {
    pub visit_id: Option<Uuid>,
    pub order_type: Option<OrderType>,
    pub status: Option<Vec<OrderStatus>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl OrderQuery {
    pub fn for_visit(visit_id: Uuid) -> Self {
        Self {
            visit_id: Some(visit_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        if let Some(visit_id) = self.visit_id {
            if order.visit_id != visit_id {
                return false;
            }
        }

        if let Some(order_type) = self.order_type {
            if order.order_type != order_type {
                return false;
            }
        }

        if let Some(statuses) = &self.status {
            if !statuses.contains(&order.status) {
                return false;
            }
        }

        true
    }
}

/// 一次就诊记录提交；出院小结与就诊状态在同一次提交中写入
#[derive(Debug, Clone)]
pub struct VisitCommit {
    pub visit: VisitRecord,
    pub discharge_summary: Option<DischargeSummary>,
}

impl VisitCommit {
    pub fn visit(visit: VisitRecord) -> Self {
        Self {
            visit,
            discharge_summary: None,
        }
    }
}

/// 变更通知，尽力投递，仅用于刷新队列显示
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChangeEvent {
    VisitCreated { visit_id: Uuid },
    VisitUpdated { visit_id: Uuid, state: VisitState },
    OrderCreated { order_id: Uuid, visit_id: Uuid },
    OrderUpdated { order_id: Uuid, visit_id: Uuid, status: OrderStatus },
    DischargeSummaryCreated { visit_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn registered_visit(department: &str) -> VisitRecord {
        let mut visit = VisitRecord::new(Uuid::new_v4(), false, "fever".into());
        visit.state = VisitState::Active(Step::Consultation);
        visit.department = Some(department.to_string());
        visit.registered_at = Some(Utc::now());
        visit
    }

    #[test]
    fn test_visit_query_matches() {
        let visit = registered_visit("CARD");
        let today = Local::now().date_naive();

        assert!(VisitQuery::default().matches(&visit));
        assert!(VisitQuery {
            step: Some(Step::Consultation),
            department: Some("CARD".into()),
            registered_on: Some(today),
            ..Default::default()
        }
        .matches(&visit));
        assert!(!VisitQuery {
            department: Some("ENT".into()),
            ..Default::default()
        }
        .matches(&visit));
        assert!(!VisitQuery {
            status: Some(VisitStatus::Discharged),
            ..Default::default()
        }
        .matches(&visit));
    }

    #[test]
    fn test_unregistered_visit_has_no_registration_date() {
        let visit = VisitRecord::new(Uuid::new_v4(), false, "cough".into());
        let query = VisitQuery {
            registered_on: Some(Local::now().date_naive()),
            ..Default::default()
        };
        assert!(!query.matches(&visit));
    }
}
