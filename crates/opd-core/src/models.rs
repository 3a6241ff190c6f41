//! 核心数据模型定义

use crate::error::{OpdError, Result};
use crate::utils::require_text;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 患者基本信息（由患者目录提供，工作流只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub mrn: String,                           // 病历号
    pub name: String,                          // 患者姓名
    pub phone: Option<String>,                 // 联系电话
    pub sex: Option<Sex>,                      // 性别
    pub birth_date: Option<NaiveDate>,         // 出生日期
    pub created_at: DateTime<Utc>,
}

/// 性别枚举
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Other,
}

/// 门诊步骤
///
/// 枚举顺序即流程图中的前进方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Entry,         // 入口/分诊
    Registration,  // 挂号
    Consultation,  // 接诊
    Investigation, // 检查检验
    Results,       // 结果
    Discharge,     // 离院
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Registration => "registration",
            Self::Consultation => "consultation",
            Self::Investigation => "investigation",
            Self::Results => "results",
            Self::Discharge => "discharge",
        }
    }

    pub fn all() -> [Step; 6] {
        [
            Self::Entry,
            Self::Registration,
            Self::Consultation,
            Self::Investigation,
            Self::Results,
            Self::Discharge,
        ]
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 就诊状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    InProgress,          // 进行中
    Admitted,            // 已收住院
    Discharged,          // 已离院
    Cancelled,           // 已取消
    EmergencyRedirected, // 已转急诊
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InProgress => "in_progress",
            Self::Admitted => "admitted",
            Self::Discharged => "discharged",
            Self::Cancelled => "cancelled",
            Self::EmergencyRedirected => "emergency_redirected",
        };
        f.write_str(name)
    }
}

/// 就诊在流程图中的位置
///
/// `current_step` 与 `status` 都由此派生，不能单独写入
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum VisitState {
    Active(Step),
    EmergencyExit,
    Admitted,
    Discharged,
    Cancelled { at: Step },
}

impl VisitState {
    pub fn current_step(&self) -> Step {
        match self {
            Self::Active(step) => *step,
            Self::EmergencyExit => Step::Entry,
            Self::Admitted | Self::Discharged => Step::Discharge,
            Self::Cancelled { at } => *at,
        }
    }

    pub fn status(&self) -> VisitStatus {
        match self {
            Self::Active(_) => VisitStatus::InProgress,
            Self::EmergencyExit => VisitStatus::EmergencyRedirected,
            Self::Admitted => VisitStatus::Admitted,
            Self::Discharged => VisitStatus::Discharged,
            Self::Cancelled { .. } => VisitStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active(_))
    }
}

impl fmt::Display for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active(step) => write!(f, "{}", step),
            Self::EmergencyExit => f.write_str("EMERGENCY_EXIT"),
            Self::Admitted => f.write_str("ADMITTED"),
            Self::Discharged => f.write_str("DISCHARGED"),
            Self::Cancelled { at } => write!(f, "CANCELLED@{}", at),
        }
    }
}

/// 挂号渠道
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationChannel {
    WalkIn,   // 现场
    Online,   // 线上预约
    Existing, // 复诊
}

impl FromStr for RegistrationChannel {
    type Err = OpdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "walk_in" | "walkin" => Ok(Self::WalkIn),
            "online" => Ok(Self::Online),
            "existing" => Ok(Self::Existing),
            other => Err(OpdError::Validation(format!(
                "unrecognized registration channel: {}",
                other
            ))),
        }
    }
}

/// 状态转换记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: VisitState,
    pub to: VisitState,
    pub event: String,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// 结果审核记录，无论是否人工放行都要留痕
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultsReview {
    pub all_orders_completed: bool,
    pub pending_orders: usize,
    pub manual_override: bool,
    pub reviewed_at: DateTime<Utc>,
}

/// 门诊就诊记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub state: VisitState,
    pub is_emergency: bool,
    pub entry_triage_notes: String,
    pub token_number: Option<String>, // OPD-<DEPT>-<YYYYMMDD>-<SEQ>
    pub department: Option<String>,
    pub registration_channel: Option<RegistrationChannel>,
    pub registered_at: Option<DateTime<Utc>>,
    pub admission_required: Option<bool>,
    pub results_review: Option<ResultsReview>,
    pub history: Vec<TransitionRecord>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VisitRecord {
    /// 分诊时创建新的就诊记录
    pub fn new(patient_id: Uuid, is_emergency: bool, entry_triage_notes: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            state: VisitState::Active(Step::Entry),
            is_emergency,
            entry_triage_notes,
            token_number: None,
            department: None,
            registration_channel: None,
            registered_at: None,
            admission_required: None,
            results_review: None,
            history: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_step(&self) -> Step {
        self.state.current_step()
    }

    pub fn status(&self) -> VisitStatus {
        self.state.status()
    }
}

/// 医嘱类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Medicine,  // 药品
    Lab,       // 检验
    Radiology, // 影像
    Procedure, // 操作/手术
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medicine => "medicine",
            Self::Lab => "lab",
            Self::Radiology => "radiology",
            Self::Procedure => "procedure",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = OpdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "medicine" => Ok(Self::Medicine),
            "lab" => Ok(Self::Lab),
            "radiology" => Ok(Self::Radiology),
            "procedure" => Ok(Self::Procedure),
            other => Err(OpdError::Validation(format!(
                "unrecognized order_type: {}",
                other
            ))),
        }
    }
}

/// 检验优先级
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabPriority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

/// 药品医嘱
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicineOrder {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    #[serde(default)]
    pub duration: Option<String>,
}

/// 检验医嘱
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabOrder {
    pub test_name: String,
    #[serde(default)]
    pub priority: LabPriority,
}

/// 影像医嘱
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RadiologyOrder {
    pub imaging_type: String,
    pub body_part: String,
    #[serde(default)]
    pub clinical_notes: Option<String>,
}

/// 操作医嘱
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureOrder {
    pub name: String,
    pub description: String,
}

/// 按医嘱类型区分的医嘱内容
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "order_type", rename_all = "snake_case")]
pub enum OrderDetails {
    Medicine(MedicineOrder),
    Lab(LabOrder),
    Radiology(RadiologyOrder),
    Procedure(ProcedureOrder),
}

impl OrderDetails {
    pub fn order_type(&self) -> OrderType {
        match self {
            Self::Medicine(_) => OrderType::Medicine,
            Self::Lab(_) => OrderType::Lab,
            Self::Radiology(_) => OrderType::Radiology,
            Self::Procedure(_) => OrderType::Procedure,
        }
    }

    /// 从未定型的请求体解析医嘱内容
    pub fn from_json(order_type: &str, payload: serde_json::Value) -> Result<Self> {
        let order_type: OrderType = order_type.parse()?;
        let invalid = |e: serde_json::Error| {
            OpdError::Validation(format!("invalid {} order details: {}", order_type, e))
        };

        let details = match order_type {
            OrderType::Medicine => Self::Medicine(serde_json::from_value(payload).map_err(invalid)?),
            OrderType::Lab => Self::Lab(serde_json::from_value(payload).map_err(invalid)?),
            OrderType::Radiology => Self::Radiology(serde_json::from_value(payload).map_err(invalid)?),
            OrderType::Procedure => Self::Procedure(serde_json::from_value(payload).map_err(invalid)?),
        };

        details.validate()?;
        Ok(details)
    }

    /// 校验各类型的必填字段
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Medicine(m) => {
                require_text("medicine name", &m.name)?;
                require_text("medicine dosage", &m.dosage)?;
                require_text("medicine frequency", &m.frequency)
            }
            Self::Lab(l) => require_text("lab test name", &l.test_name),
            Self::Radiology(r) => {
                require_text("imaging type", &r.imaging_type)?;
                require_text("body part", &r.body_part)
            }
            Self::Procedure(p) => {
                require_text("procedure name", &p.name)?;
                require_text("procedure description", &p.description)
            }
        }
    }
}

/// 医嘱状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Ordered,    // 已开立
    InProgress, // 执行中
    Completed,  // 已完成
    Cancelled,  // 已取消
}

impl OrderStatus {
    /// 只能前进：ordered → in_progress → completed，或任意状态 → cancelled
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Ordered, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::Ordered, Self::Cancelled)
                | (Self::InProgress, Self::Cancelled)
                | (Self::Completed, Self::Cancelled)
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Ordered | Self::InProgress)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ordered => "ordered",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// 医嘱状态变更记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
}

/// 临床医嘱
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub order_type: OrderType,
    pub details: OrderDetails,
    pub status: OrderStatus,
    pub status_history: Vec<OrderStatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(visit_id: Uuid, patient_id: Uuid, details: OrderDetails) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            visit_id,
            patient_id,
            order_type: details.order_type(),
            details,
            status: OrderStatus::Ordered,
            status_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 出院小结，仅在不需要住院时生成
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DischargeSummary {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub admission_required: bool,
    pub discharge_diagnosis: String,
    pub treatment_summary: String,
    pub special_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}
