//! 就诊号与候诊时间估算
//!
//! 纯计算，不产生副作用。就诊号仅供显示和叫号使用，并发挂号时同一科室
//! 同一秒内可能算出相同序号：排队长度的读取不是原子的，数据模型也不把
//! 就诊号当作唯一键。

use chrono::{Local, NaiveDate};
use opd_core::utils::normalize_department_code;
use opd_core::Result;

/// 每位患者的默认服务时长（分钟）
pub const DEFAULT_MINUTES_PER_PATIENT: u32 = 5;

/// 就诊号/候诊估算器
#[derive(Debug, Clone, Copy)]
pub struct QueueEstimator {
    minutes_per_patient: u32,
}

impl QueueEstimator {
    pub fn new() -> Self {
        Self::with_minutes_per_patient(DEFAULT_MINUTES_PER_PATIENT)
    }

    pub fn with_minutes_per_patient(minutes_per_patient: u32) -> Self {
        Self { minutes_per_patient }
    }

    /// 生成就诊号 OPD-<DEPT>-<YYYYMMDD>-<SEQ>，日期取生成时的本地日期
    pub fn next_token(&self, department: &str, queue_length: usize) -> Result<String> {
        self.next_token_on(department, queue_length, Local::now().date_naive())
    }

    /// 按指定日期生成就诊号，SEQ = queue_length + 1，至少三位补零
    pub fn next_token_on(&self, department: &str, queue_length: usize, date: NaiveDate) -> Result<String> {
        let department = normalize_department_code(department)?;
        Ok(format!(
            "OPD-{}-{}-{:03}",
            department,
            date.format("%Y%m%d"),
            queue_length + 1
        ))
    }

    /// 估算候诊分钟数：排队位置 × 每人服务时长
    pub fn estimate_wait(&self, position_in_queue: usize) -> u32 {
        u32::try_from(position_in_queue)
            .unwrap_or(u32::MAX)
            .saturating_mul(self.minutes_per_patient)
    }
}

impl Default for QueueEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// 使用默认估算器生成就诊号
pub fn next_token(department: &str, queue_length: usize) -> Result<String> {
    QueueEstimator::new().next_token(department, queue_length)
}

/// 使用默认估算器估算候诊时间
pub fn estimate_wait(position_in_queue: usize) -> u32 {
    QueueEstimator::new().estimate_wait(position_in_queue)
}
