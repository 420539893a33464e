use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::api::{Order, OrderId, OrderStats, OrderStatus, Restriction, RestrictionId};
use redis::aio::Connection;
use redis::{AsyncCommands, Client, Script};

use crate::config::{Config, StorageBackend};

pub mod memory;

pub use memory::InMemoryRepository;

const ORDER_SEQ: &str = "orders:next_id";
const ORDERS: &str = "orders";
const RESTRICTION_SEQ: &str = "restrictions:next_id";
const RESTRICTIONS: &str = "restrictions";

// Writes ARGV[2] only while the status still equals ARGV[1]; returns the
// status seen before the write, nil when the order is gone.
const SWAP_STATUS: &str = r"
local current = redis.call('HGET', KEYS[1], 'status')
if current == ARGV[1] then
  redis.call('HSET', KEYS[1], 'status', ARGV[2])
end
return current
";

// Flips `enabled` and returns the new value, -1 when the row is gone.
const FLIP_ENABLED: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
local next = '1'
if redis.call('HGET', KEYS[1], 'enabled') == '1' then
  next = '0'
end
redis.call('HSET', KEYS[1], 'enabled', next)
return tonumber(next)
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub name: String,
    pub drink: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRestriction {
    pub subnet: String,
    pub description: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusSwap {
    Swapped(Order),
    /// Someone else moved the order first; carries what is stored now.
    Conflict(OrderStatus),
    Missing,
}

#[async_trait]
pub trait Repository: Send + Sync {
    fn name(&self) -> &'static str;

    async fn insert_order(&self, order: NewOrder) -> Result<Order>;
    /// Newest first.
    async fn list_orders(&self) -> Result<Vec<Order>>;
    /// Oldest first.
    async fn list_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;
    async fn swap_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<StatusSwap>;
    async fn delete_orders(&self, ids: &[OrderId]) -> Result<u64>;
    /// Removes orders created strictly before `cutoff`.
    async fn purge_orders_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn count_orders_by_status(&self) -> Result<OrderStats>;

    async fn insert_restriction(&self, restriction: NewRestriction) -> Result<Restriction>;
    /// Newest first.
    async fn list_restrictions(&self) -> Result<Vec<Restriction>>;
    async fn enabled_restrictions(&self) -> Result<Vec<Restriction>>;
    async fn get_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>>;
    /// Flips `enabled` in one step and returns the row as it now stands.
    async fn toggle_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>>;
    async fn delete_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>>;
}

impl Debug for dyn Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub async fn connect(config: &Config) -> Result<Arc<dyn Repository>> {
    Ok(match config.storage {
        StorageBackend::Redis => Arc::new(
            RedisRepository::new(&config.redis_url)
                .await
                .with_context(|| format!("connecting to redis at {}", config.redis_url))?,
        ),
        StorageBackend::Memory => Arc::new(InMemoryRepository::default()),
    })
}

// Every call opens its own connection; the client itself is cheap to clone.
#[derive(Debug, Clone)]
pub struct RedisRepository {
    client: Client,
    swap_status: Script,
    flip_enabled: Script,
}

impl RedisRepository {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let url = if redis_url.contains("://") {
            redis_url.to_string()
        } else {
            format!("redis://{}", redis_url)
        };
        let client = Client::open(url)?;
        let mut conn = client.get_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self {
            client,
            swap_status: Script::new(SWAP_STATUS),
            flip_enabled: Script::new(FLIP_ENABLED),
        })
    }

    async fn connection(&self) -> Result<Connection> {
        Ok(self.client.get_async_connection().await?)
    }
}

fn order_key(id: OrderId) -> String {
    format!("orders:{}", id)
}

fn restriction_key(id: RestrictionId) -> String {
    format!("restrictions:{}", id)
}

fn field(fields: &HashMap<String, String>, key: &str, row: &str) -> Result<String> {
    fields
        .get(key)
        .cloned()
        .ok_or_else(|| anyhow!("{} is missing field {}", row, key))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn order_from_fields(id: OrderId, fields: HashMap<String, String>) -> Result<Option<Order>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let row = order_key(id);
    Ok(Some(Order {
        id,
        name: field(&fields, "name", &row)?,
        drink: field(&fields, "drink", &row)?,
        email: fields.get("email").cloned().filter(|e| !e.is_empty()),
        status: field(&fields, "status", &row)?.parse()?,
        created_at: parse_time(&field(&fields, "created_at", &row)?)?,
    }))
}

fn restriction_from_fields(
    id: RestrictionId,
    fields: HashMap<String, String>,
) -> Result<Option<Restriction>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let row = restriction_key(id);
    Ok(Some(Restriction {
        id,
        subnet: field(&fields, "subnet", &row)?,
        description: fields.get("description").cloned().unwrap_or_default(),
        enabled: field(&fields, "enabled", &row)? == "1",
        created_at: parse_time(&field(&fields, "created_at", &row)?)?,
    }))
}

async fn load_orders(conn: &mut Connection, ids: Vec<OrderId>) -> Result<Vec<Order>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut pipe = redis::pipe();
    for id in &ids {
        pipe.hgetall(order_key(*id));
    }
    let rows: Vec<HashMap<String, String>> = pipe.query_async(conn).await?;
    ids.into_iter()
        .zip(rows)
        .filter_map(|(id, fields)| order_from_fields(id, fields).transpose())
        .collect()
}

async fn load_restrictions(
    conn: &mut Connection,
    ids: Vec<RestrictionId>,
) -> Result<Vec<Restriction>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut pipe = redis::pipe();
    for id in &ids {
        pipe.hgetall(restriction_key(*id));
    }
    let rows: Vec<HashMap<String, String>> = pipe.query_async(conn).await?;
    ids.into_iter()
        .zip(rows)
        .filter_map(|(id, fields)| restriction_from_fields(id, fields).transpose())
        .collect()
}

async fn remove_orders(conn: &mut Connection, ids: &[OrderId]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut pipe = redis::pipe();
    pipe.atomic();
    for id in ids {
        pipe.del(order_key(*id)).zrem(ORDERS, *id).ignore();
    }
    let removed: Vec<u64> = pipe.query_async(conn).await?;
    Ok(removed.into_iter().sum())
}

#[async_trait]
impl Repository for RedisRepository {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order> {
        let mut conn = self.connection().await?;
        let id: OrderId = conn.incr(ORDER_SEQ, 1u64).await?;
        let mut fields = vec![
            ("name", order.name.clone()),
            ("drink", order.drink.clone()),
            ("status", OrderStatus::Pending.to_string()),
            ("created_at", order.created_at.to_rfc3339()),
        ];
        if let Some(email) = &order.email {
            fields.push(("email", email.clone()));
        }
        redis::pipe()
            .atomic()
            .hset_multiple(order_key(id), fields.as_slice())
            .ignore()
            .zadd(ORDERS, id, order.created_at.timestamp_millis())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(Order {
            id,
            name: order.name,
            drink: order.drink,
            email: order.email,
            status: OrderStatus::Pending,
            created_at: order.created_at,
        })
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let mut conn = self.connection().await?;
        let ids: Vec<OrderId> = conn.zrevrange(ORDERS, 0, -1).await?;
        load_orders(&mut conn, ids).await
    }

    async fn list_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let mut conn = self.connection().await?;
        let ids: Vec<OrderId> = conn.zrange(ORDERS, 0, -1).await?;
        let orders = load_orders(&mut conn, ids).await?;
        Ok(orders.into_iter().filter(|o| o.status == status).collect())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(order_key(id)).await?;
        order_from_fields(id, fields)
    }

    async fn swap_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<StatusSwap> {
        let mut conn = self.connection().await?;
        let prior: Option<String> = self
            .swap_status
            .key(order_key(id))
            .arg(expected.as_str())
            .arg(target.as_str())
            .invoke_async(&mut conn)
            .await?;
        match prior {
            None => Ok(StatusSwap::Missing),
            Some(status) if status == expected.as_str() => {
                let fields: HashMap<String, String> = conn.hgetall(order_key(id)).await?;
                Ok(order_from_fields(id, fields)?
                    .map(StatusSwap::Swapped)
                    .unwrap_or(StatusSwap::Missing))
            }
            Some(status) => Ok(StatusSwap::Conflict(status.parse()?)),
        }
    }

    async fn delete_orders(&self, ids: &[OrderId]) -> Result<u64> {
        let mut conn = self.connection().await?;
        remove_orders(&mut conn, ids).await
    }

    async fn purge_orders_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.connection().await?;
        // scores are whole milliseconds, so the last one may still hold
        // orders newer than the cutoff
        let ids: Vec<OrderId> = conn
            .zrangebyscore(ORDERS, "-inf", cutoff.timestamp_millis())
            .await?;
        let expired: Vec<OrderId> = load_orders(&mut conn, ids)
            .await?
            .into_iter()
            .filter(|order| order.created_at < cutoff)
            .map(|order| order.id)
            .collect();
        remove_orders(&mut conn, &expired).await
    }

    async fn count_orders_by_status(&self) -> Result<OrderStats> {
        let mut conn = self.connection().await?;
        let ids: Vec<OrderId> = conn.zrange(ORDERS, 0, -1).await?;
        let mut stats = OrderStats::default();
        if ids.is_empty() {
            return Ok(stats);
        }
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hget(order_key(*id), "status");
        }
        let statuses: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        for status in statuses.into_iter().flatten() {
            stats.record(status.parse()?);
        }
        Ok(stats)
    }

    async fn insert_restriction(&self, restriction: NewRestriction) -> Result<Restriction> {
        let mut conn = self.connection().await?;
        let id: RestrictionId = conn.incr(RESTRICTION_SEQ, 1u64).await?;
        let enabled = if restriction.enabled { "1" } else { "0" };
        let fields = [
            ("subnet", restriction.subnet.clone()),
            ("description", restriction.description.clone()),
            ("enabled", enabled.to_string()),
            ("created_at", restriction.created_at.to_rfc3339()),
        ];
        redis::pipe()
            .atomic()
            .hset_multiple(restriction_key(id), &fields)
            .ignore()
            .zadd(RESTRICTIONS, id, restriction.created_at.timestamp_millis())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(Restriction {
            id,
            subnet: restriction.subnet,
            description: restriction.description,
            enabled: restriction.enabled,
            created_at: restriction.created_at,
        })
    }

    async fn list_restrictions(&self) -> Result<Vec<Restriction>> {
        let mut conn = self.connection().await?;
        let ids: Vec<RestrictionId> = conn.zrevrange(RESTRICTIONS, 0, -1).await?;
        load_restrictions(&mut conn, ids).await
    }

    async fn enabled_restrictions(&self) -> Result<Vec<Restriction>> {
        let mut conn = self.connection().await?;
        let ids: Vec<RestrictionId> = conn.zrange(RESTRICTIONS, 0, -1).await?;
        let restrictions = load_restrictions(&mut conn, ids).await?;
        Ok(restrictions.into_iter().filter(|r| r.enabled).collect())
    }

    async fn get_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(restriction_key(id)).await?;
        restriction_from_fields(id, fields)
    }

    async fn toggle_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>> {
        let mut conn = self.connection().await?;
        let enabled: i64 = self
            .flip_enabled
            .key(restriction_key(id))
            .invoke_async(&mut conn)
            .await?;
        if enabled < 0 {
            return Ok(None);
        }
        let fields: HashMap<String, String> = conn.hgetall(restriction_key(id)).await?;
        Ok(restriction_from_fields(id, fields)?.map(|restriction| Restriction {
            enabled: enabled == 1,
            ..restriction
        }))
    }

    async fn delete_restriction(&self, id: RestrictionId) -> Result<Option<Restriction>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(restriction_key(id)).await?;
        let Some(restriction) = restriction_from_fields(id, fields)? else {
            return Ok(None);
        };
        redis::pipe()
            .atomic()
            .del(restriction_key(id))
            .ignore()
            .zrem(RESTRICTIONS, id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(Some(restriction))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_order(name: &str, age: Duration) -> NewOrder {
        NewOrder {
            name: name.to_string(),
            drink: String::from("Tea"),
            email: None,
            created_at: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn test_in_memory_repo() {
        repo_test(Box::new(InMemoryRepository::default())).await;
    }

    #[tokio::test]
    #[ignore = "needs a redis server on 127.0.0.1:6379"]
    async fn test_redis_repo() {
        let repo = RedisRepository::new("127.0.0.1:6379").await.unwrap();
        let mut conn = repo.connection().await.unwrap();
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await
            .unwrap();
        repo_test(Box::new(repo)).await;
    }

    async fn repo_test(repo: Box<dyn Repository>) {
        let old = repo
            .insert_order(new_order("old", Duration::days(10)))
            .await
            .unwrap();
        let mut fresh = new_order("fresh", Duration::minutes(1));
        fresh.email = Some(String::from("fresh@example.com"));
        let fresh = repo.insert_order(fresh).await.unwrap();
        assert!(fresh.id > old.id);
        assert_eq!(fresh.status, OrderStatus::Pending);

        let listed = repo.list_orders().await.unwrap();
        assert_eq!(
            listed.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![fresh.id, old.id]
        );
        assert_eq!(
            repo.get_order(fresh.id).await.unwrap().unwrap().email.as_deref(),
            Some("fresh@example.com")
        );
        assert_eq!(repo.get_order(9_999).await.unwrap(), None);

        // status compare-and-set
        let swapped = repo
            .swap_order_status(old.id, OrderStatus::Pending, OrderStatus::Ready)
            .await
            .unwrap();
        assert!(matches!(swapped, StatusSwap::Swapped(ref o) if o.status == OrderStatus::Ready));
        assert_eq!(
            repo.swap_order_status(old.id, OrderStatus::Pending, OrderStatus::Ready)
                .await
                .unwrap(),
            StatusSwap::Conflict(OrderStatus::Ready)
        );
        assert_eq!(
            repo.swap_order_status(9_999, OrderStatus::Pending, OrderStatus::Ready)
                .await
                .unwrap(),
            StatusSwap::Missing
        );

        let ready = repo
            .list_orders_by_status(OrderStatus::Ready)
            .await
            .unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, old.id);

        let stats = repo.count_orders_by_status().await.unwrap();
        assert_eq!((stats.total, stats.pending, stats.ready), (2, 1, 1));

        // purge is strictly older than the cutoff
        let purged = repo
            .purge_orders_before(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(repo.get_order(old.id).await.unwrap(), None);

        // a cutoff inside a millisecond splits the orders of that millisecond
        let cutoff = Utc::now() - Duration::days(2);
        let cutoff = cutoff - Duration::nanoseconds(i64::from(cutoff.timestamp_subsec_nanos()))
            + Duration::microseconds(500);
        let mut just_before = new_order("just-before", Duration::zero());
        just_before.created_at = cutoff - Duration::microseconds(200);
        let just_before = repo.insert_order(just_before).await.unwrap();
        let mut at_cutoff = new_order("at-cutoff", Duration::zero());
        at_cutoff.created_at = cutoff;
        let at_cutoff = repo.insert_order(at_cutoff).await.unwrap();
        assert_eq!(repo.purge_orders_before(cutoff).await.unwrap(), 1);
        assert_eq!(repo.get_order(just_before.id).await.unwrap(), None);
        assert_eq!(repo.delete_orders(&[at_cutoff.id]).await.unwrap(), 1);

        assert_eq!(repo.delete_orders(&[fresh.id, 9_999]).await.unwrap(), 1);
        assert!(repo.list_orders().await.unwrap().is_empty());

        // restrictions
        let first = repo
            .insert_restriction(NewRestriction {
                subnet: String::from("10.0.0.0/24"),
                description: String::from("office"),
                enabled: true,
                created_at: Utc::now() - Duration::minutes(5),
            })
            .await
            .unwrap();
        let second = repo
            .insert_restriction(NewRestriction {
                subnet: String::from("192.168.0.0/16"),
                description: String::new(),
                enabled: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let listed = repo.list_restrictions().await.unwrap();
        assert_eq!(
            listed.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        let toggled = repo.toggle_restriction(first.id).await.unwrap().unwrap();
        assert!(!toggled.enabled);
        assert_eq!(toggled.subnet, first.subnet);
        assert_eq!(repo.toggle_restriction(9_999).await.unwrap(), None);
        let enabled = repo.enabled_restrictions().await.unwrap();
        assert_eq!(enabled, vec![second.clone()]);
        assert!(!repo.get_restriction(first.id).await.unwrap().unwrap().enabled);
        assert!(repo.toggle_restriction(first.id).await.unwrap().unwrap().enabled);
        assert!(repo.toggle_restriction(first.id).await.unwrap().is_some());

        assert_eq!(
            repo.delete_restriction(second.id).await.unwrap(),
            Some(second.clone())
        );
        assert_eq!(repo.delete_restriction(second.id).await.unwrap(), None);
        assert_eq!(repo.get_restriction(9_999).await.unwrap(), None);
    }
}
