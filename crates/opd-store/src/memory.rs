//! 内存存储实现

use crate::models::{ChangeEvent, OrderQuery, VisitCommit, VisitGuard, VisitQuery};
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use opd_core::{DischargeSummary, OpdError, Order, OrderStatus, Result, VisitRecord, VisitState};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// 默认变更通知缓冲区大小
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Tables {
    visits: HashMap<Uuid, VisitRecord>,
    visit_log: Vec<Uuid>, // 插入顺序
    orders: HashMap<Uuid, Order>,
    order_log: Vec<Uuid>,
    discharge_summaries: HashMap<Uuid, DischargeSummary>, // visit_id -> summary
}

/// 内存记录存储
///
/// 所有写操作在同一把写锁内完成比较和替换，因此同一就诊的并发转换
/// 只有一个能成功。
#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl InMemoryStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_FEED_CAPACITY)
    }

    /// 指定变更通知缓冲区大小
    pub fn with_capacity(change_feed_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_feed_capacity.max(1));
        Self {
            tables: RwLock::new(Tables::default()),
            changes,
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // 没有订阅者时发送失败，忽略即可
        if self.changes.send(event).is_err() {
            tracing::trace!("No change feed subscribers");
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 在持有写锁时检查医嘱所属就诊的状态
fn check_visit(tables: &Tables, visit_id: Uuid, visit_allows: VisitGuard, action: &str) -> Result<()> {
    let visit = tables
        .visits
        .get(&visit_id)
        .ok_or_else(|| OpdError::NotFound(format!("Visit {} not found", visit_id)))?;

    if visit_allows(&visit.state) {
        Ok(())
    } else {
        Err(OpdError::illegal(visit.state, action))
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_visit(&self, visit: VisitRecord) -> Result<VisitRecord> {
        let visit_id = visit.id;
        {
            let mut tables = self.tables.write().await;
            if tables.visits.contains_key(&visit_id) {
                return Err(OpdError::Store(format!("Visit {} already exists", visit_id)));
            }
            tables.visits.insert(visit_id, visit.clone());
            tables.visit_log.push(visit_id);
        }

        tracing::debug!("Inserted visit {}", visit_id);
        self.publish(ChangeEvent::VisitCreated { visit_id });
        Ok(visit)
    }

    async fn get_visit(&self, visit_id: Uuid) -> Result<VisitRecord> {
        let tables = self.tables.read().await;
        tables
            .visits
            .get(&visit_id)
            .cloned()
            .ok_or_else(|| OpdError::NotFound(format!("Visit {} not found", visit_id)))
    }

    async fn commit_visit(&self, commit: VisitCommit, expected: VisitState) -> Result<VisitRecord> {
        let VisitCommit {
            mut visit,
            discharge_summary,
        } = commit;
        let visit_id = visit.id;

        {
            let mut tables = self.tables.write().await;
            let current = tables
                .visits
                .get(&visit_id)
                .ok_or_else(|| OpdError::NotFound(format!("Visit {} not found", visit_id)))?;

            if current.state != expected {
                return Err(OpdError::stale(
                    format!("visit {}", visit_id),
                    expected,
                    current.state,
                ));
            }

            if let Some(summary) = &discharge_summary {
                if summary.visit_id != visit_id {
                    return Err(OpdError::Store(format!(
                        "Discharge summary {} belongs to visit {}",
                        summary.id, summary.visit_id
                    )));
                }
                if tables.discharge_summaries.contains_key(&visit_id) {
                    return Err(OpdError::Store(format!(
                        "Visit {} already has a discharge summary",
                        visit_id
                    )));
                }
            }

            visit.version = current.version + 1;
            visit.updated_at = Utc::now();
            tables.visits.insert(visit_id, visit.clone());
            if let Some(summary) = discharge_summary.clone() {
                tables.discharge_summaries.insert(visit_id, summary);
            }
        }

        self.publish(ChangeEvent::VisitUpdated {
            visit_id,
            state: visit.state,
        });
        if discharge_summary.is_some() {
            self.publish(ChangeEvent::DischargeSummaryCreated { visit_id });
        }
        Ok(visit)
    }

    async fn query_visits(&self, query: &VisitQuery) -> Result<Vec<VisitRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .visit_log
            .iter()
            .filter_map(|id| tables.visits.get(id))
            .filter(|visit| query.matches(visit))
            .cloned()
            .collect())
    }

    async fn insert_order(&self, order: Order, visit_allows: VisitGuard) -> Result<Order> {
        let order_id = order.id;
        let visit_id = order.visit_id;
        {
            let mut tables = self.tables.write().await;
            check_visit(&tables, visit_id, visit_allows, "create order")?;
            if tables.orders.contains_key(&order_id) {
                return Err(OpdError::Store(format!("Order {} already exists", order_id)));
            }
            tables.orders.insert(order_id, order.clone());
            tables.order_log.push(order_id);
        }

        self.publish(ChangeEvent::OrderCreated { order_id, visit_id });
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        let tables = self.tables.read().await;
        tables
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| OpdError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn update_order(&self, order: Order, expected: OrderStatus, visit_allows: VisitGuard) -> Result<Order> {
        let order_id = order.id;
        {
            let mut tables = self.tables.write().await;
            check_visit(&tables, order.visit_id, visit_allows, &format!("order {}", order.status))?;
            let current = tables
                .orders
                .get(&order_id)
                .ok_or_else(|| OpdError::NotFound(format!("Order {} not found", order_id)))?;

            if current.status != expected {
                return Err(OpdError::stale(
                    format!("order {}", order_id),
                    expected,
                    current.status,
                ));
            }
            tables.orders.insert(order_id, order.clone());
        }

        self.publish(ChangeEvent::OrderUpdated {
            order_id,
            visit_id: order.visit_id,
            status: order.status,
        });
        Ok(order)
    }

    async fn query_orders(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;

        // 倒序遍历插入日志后再稳定排序，创建时间相同的以后插入者在前
        let mut orders: Vec<&Order> = tables
            .order_log
            .iter()
            .rev()
            .filter_map(|id| tables.orders.get(id))
            .filter(|order| query.matches(order))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = query.offset.unwrap_or(0).min(orders.len());
        let end = match query.limit {
            Some(limit) => offset.saturating_add(limit).min(orders.len()),
            None => orders.len(),
        };

        Ok(orders[offset..end].iter().map(|order| (*order).clone()).collect())
    }

    async fn get_discharge_summary(&self, visit_id: Uuid) -> Result<Option<DischargeSummary>> {
        let tables = self.tables.read().await;
        Ok(tables.discharge_summaries.get(&visit_id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
