//! 医嘱台账
//!
//! 记录就诊下的药品、检验、影像和操作医嘱，以及各自独立的状态生命周期。
//! 台账只追加和前进更新，除创建和状态推进外没有其他写入路径。

use crate::orchestrator::retry_once_on_stale;
use chrono::Utc;
use opd_core::{
    OpdError, Order, OrderDetails, OrderStatus, OrderStatusChange, OrderType, Result, Step, VisitState,
};
use opd_store::{OrderQuery, RecordStore, VisitGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// 就诊医嘱统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_orders: usize,
    pub ordered: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub by_type: HashMap<OrderType, usize>,
}

/// 只有接诊和检查检验阶段可以开立医嘱
fn accepts_new_orders(state: &VisitState) -> bool {
    matches!(
        state,
        VisitState::Active(Step::Consultation) | VisitState::Active(Step::Investigation)
    )
}

fn accepts_fulfilment(state: &VisitState) -> bool {
    !matches!(state, VisitState::Cancelled { .. })
}

fn any_visit_state(_: &VisitState) -> bool {
    true
}

/// 医嘱台账
pub struct OrderLedger {
    store: Arc<dyn RecordStore>,
}

impl OrderLedger {
    /// 创建新的医嘱台账
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// 开立医嘱，初始状态为 ordered
    pub async fn create_order(
        &self,
        visit_id: Uuid,
        patient_id: Uuid,
        order_type: OrderType,
        details: OrderDetails,
    ) -> Result<Order> {
        if details.order_type() != order_type {
            return Err(OpdError::Validation(format!(
                "order_type {} does not match {} details",
                order_type,
                details.order_type()
            )));
        }
        details.validate()?;

        let visit = self.store.get_visit(visit_id).await?;
        if visit.patient_id != patient_id {
            return Err(OpdError::Validation(format!(
                "patient {} does not own visit {}",
                patient_id, visit_id
            )));
        }

        // 就诊状态在存储写锁内复查，与并发的取消或步骤推进互斥
        let order = self
            .store
            .insert_order(Order::new(visit_id, patient_id, details), accepts_new_orders)
            .await?;

        tracing::info!("Created {} order {} for visit {}", order.order_type, order.id, visit_id);
        Ok(order)
    }

    /// 从未定型的请求体开立医嘱
    pub async fn create_order_from_json(
        &self,
        visit_id: Uuid,
        patient_id: Uuid,
        order_type: &str,
        details: serde_json::Value,
    ) -> Result<Order> {
        let details = OrderDetails::from_json(order_type, details)?;
        self.create_order(visit_id, patient_id, details.order_type(), details)
            .await
    }

    /// 推进医嘱状态，由药房、检验科、放射科、手术室等执行方调用
    pub async fn advance_order_status(&self, order_id: Uuid, new_status: OrderStatus) -> Result<Order> {
        let order = self.store.get_order(order_id).await?;
        let old_status = order.status;

        if !old_status.can_advance_to(new_status) {
            tracing::warn!("Rejected order {} status change {} -> {}", order_id, old_status, new_status);
            return Err(OpdError::illegal(old_status, new_status));
        }

        let now = Utc::now();
        let mut updated = order;
        updated.status = new_status;
        updated.updated_at = now;
        updated.status_history.push(OrderStatusChange {
            from: old_status,
            to: new_status,
            at: now,
        });

        // 就诊取消后医嘱只能随之取消，不能再执行或完成
        let visit_allows: VisitGuard = match new_status {
            OrderStatus::Cancelled => any_visit_state,
            _ => accepts_fulfilment,
        };
        let updated = self.store.update_order(updated, old_status, visit_allows).await?;
        tracing::info!("Updated order {} status from {} to {}", order_id, old_status, new_status);
        Ok(updated)
    }

    /// 列出就诊医嘱，最新创建的在前；每次调用都重新读取
    pub async fn list_orders(&self, visit_id: Uuid, filter_type: Option<OrderType>) -> Result<Vec<Order>> {
        self.query_orders(&OrderQuery {
            visit_id: Some(visit_id),
            order_type: filter_type,
            ..Default::default()
        })
        .await
    }

    /// 查询医嘱（分页）
    pub async fn query_orders(&self, filter: &OrderQuery) -> Result<Vec<Order>> {
        self.store.query_orders(filter).await
    }

    /// 所有未取消的医嘱是否都已完成；没有医嘱时为 true
    pub async fn all_completed(&self, visit_id: Uuid) -> Result<bool> {
        // 确认就诊存在
        self.store.get_visit(visit_id).await?;

        let orders = self.list_orders(visit_id, None).await?;
        Ok(orders
            .iter()
            .filter(|order| order.status != OrderStatus::Cancelled)
            .all(|order| order.status == OrderStatus::Completed))
    }

    /// 获取尚未完成的医嘱
    pub async fn pending_orders(&self, visit_id: Uuid) -> Result<Vec<Order>> {
        self.query_orders(&OrderQuery {
            visit_id: Some(visit_id),
            status: Some(vec![OrderStatus::Ordered, OrderStatus::InProgress]),
            ..Default::default()
        })
        .await
    }

    /// 取消就诊下所有未完成的医嘱，返回取消数量
    ///
    /// 单条医嘱冲突时重新读取后再试一次，仍失败只记录日志并继续处理其余医嘱。
    pub async fn cancel_open_orders(&self, visit_id: Uuid) -> Result<usize> {
        let mut cancelled = 0;
        for order in self.pending_orders(visit_id).await? {
            let result = retry_once_on_stale(|| self.advance_order_status(order.id, OrderStatus::Cancelled)).await;
            match result {
                Ok(_) => cancelled += 1,
                Err(e) => tracing::error!("Failed to cancel order {} of visit {}: {}", order.id, visit_id, e),
            }
        }

        if cancelled > 0 {
            tracing::info!("Cancelled {} open orders for visit {}", cancelled, visit_id);
        }
        Ok(cancelled)
    }

    /// 获取就诊医嘱统计
    pub async fn order_stats(&self, visit_id: Uuid) -> Result<OrderStats> {
        let orders = self.list_orders(visit_id, None).await?;
        let mut stats = OrderStats {
            total_orders: orders.len(),
            ..Default::default()
        };

        for order in &orders {
            match order.status {
                OrderStatus::Ordered => stats.ordered += 1,
                OrderStatus::InProgress => stats.in_progress += 1,
                OrderStatus::Completed => stats.completed += 1,
                OrderStatus::Cancelled => stats.cancelled += 1,
            }
            *stats.by_type.entry(order.order_type).or_insert(0) += 1;
        }

        Ok(stats)
    }
}
