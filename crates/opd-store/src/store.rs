//! 持久化存储契约

use crate::models::{ChangeEvent, OrderQuery, VisitCommit, VisitGuard, VisitQuery};
use async_trait::async_trait;
use opd_core::{DischargeSummary, Order, OrderStatus, Result, VisitRecord, VisitState};
use tokio::sync::broadcast;
use uuid::Uuid;

/// 记录存储接口
///
/// 更新操作都带乐观前置条件：存储中的当前值与 `expected` 不一致时返回
/// `OpdError::StaleState`，不得覆盖。
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 插入新的就诊记录
    async fn insert_visit(&self, visit: VisitRecord) -> Result<VisitRecord>;

    /// 按ID读取就诊记录，不存在时返回 NotFound
    async fn get_visit(&self, visit_id: Uuid) -> Result<VisitRecord>;

    /// 比较并提交就诊记录（及可选的出院小结）
    async fn commit_visit(&self, commit: VisitCommit, expected: VisitState) -> Result<VisitRecord>;

    /// 条件查询就诊记录，按创建时间升序
    async fn query_visits(&self, query: &VisitQuery) -> Result<Vec<VisitRecord>>;

    /// 插入新的医嘱；所属就诊的当前状态须满足 `visit_allows`，
    /// 检查与写入在同一次存储操作内完成
    async fn insert_order(&self, order: Order, visit_allows: VisitGuard) -> Result<Order>;

    /// 按ID读取医嘱
    async fn get_order(&self, order_id: Uuid) -> Result<Order>;

    /// 比较并更新医嘱，所属就诊状态的检查同 `insert_order`
    async fn update_order(&self, order: Order, expected: OrderStatus, visit_allows: VisitGuard) -> Result<Order>;

    /// 条件查询医嘱，最新创建的在前
    async fn query_orders(&self, query: &OrderQuery) -> Result<Vec<Order>>;

    /// 读取就诊的出院小结
    async fn get_discharge_summary(&self, visit_id: Uuid) -> Result<Option<DischargeSummary>>;

    /// 订阅变更通知
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
