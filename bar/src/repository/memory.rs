use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::api::{Order, OrderId, OrderStats, OrderStatus, Restriction, RestrictionId};

use super::{NewOrder, NewRestriction, Repository, StatusSwap};

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    last_order_id: OrderId,
    orders: BTreeMap<OrderId, Order>,
    last_restriction_id: RestrictionId,
    restrictions: BTreeMap<RestrictionId, Restriction>,
}

impl InMemoryRepository {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn newest_first<T>(rows: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, u64)) {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order> {
        let mut tables = self.tables()?;
        tables.last_order_id += 1;
        let order = Order {
            id: tables.last_order_id,
            name: order.name,
            drink: order.drink,
            email: order.email,
            status: OrderStatus::Pending,
            created_at: order.created_at,
        };
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self.tables()?.orders.values().cloned().collect();
        newest_first(&mut orders, |o| (o.created_at, o.id));
        Ok(orders)
    }

    async fn list_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .tables()?
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables()?.orders.get(&id).cloned())
    }

    async fn swap_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<StatusSwap> {
        let mut tables = self.tables()?;
        let Some(order) = tables.orders.get_mut(&id) else {
            return Ok(StatusSwap::Missing);
        };
        if order.status != expected {
            return Ok(StatusSwap::Conflict(order.status));
        }
        order.status = target;
        Ok(StatusSwap::Swapped(order.clone()))
    }

    async fn delete_orders(&self, ids: &[OrderId]) -> Result<u64> {
        let mut tables = self.tables()?;
        let removed = ids
            .iter()
            .filter(|id| tables.orders.remove(*id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn purge_orders_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables()?;
        let before = tables.orders.len();
        tables.orders.retain(|_, order| order.created_at >= cutoff);
        Ok((before - tables.orders.len()) as u64)
    }

    async fn count_orders_by_status(&self) -> Result<OrderStats> {
        let mut stats = OrderStats::default();
        for order in self.tables()?.orders.values() {
            stats.record(order.status);
        }
        Ok(stats)
    }

    async fn insert_restriction(&self, restriction: NewRestriction) -> Result<Restriction> {
        let mut tables = self.tables()?;
        tables.last_restriction_id += 1;
        let restriction = Restriction {
            id: tables.last_restriction_id,
            subnet: restriction.subnet,
            description: restriction.description,
            enabled: restriction.enabled,
            created_at: restriction.created_at,
        };
        tables
            .restrictions
            .insert(restriction.id, restriction.clone());
        Ok(restriction)
    }

    async fn list_restrictions(&self) -> Result<Vec<Restriction>> {
        let mut restrictions: Vec<Restriction> =
            self.tables()?.restrictions.values().cloned().collect();
        newest_first(&mut restrictions, |r| (r.created_at, r.id));
        Ok(restrictions)
    }

    async fn enabled_restrictions(&self) -> Result<Vec<Restriction>> {
        Ok(self
            .tables()?
            .restrictions
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn get_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>> {
        Ok(self.tables()?.restrictions.get(&id).cloned())
    }

    async fn toggle_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>> {
        let mut tables = self.tables()?;
        Ok(tables.restrictions.get_mut(&id).map(|restriction| {
            restriction.enabled = !restriction.enabled;
            restriction.clone()
        }))
    }

    async fn delete_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>> {
        Ok(self.tables()?.restrictions.remove(&id))
    }
}
