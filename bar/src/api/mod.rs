use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::{Duration, Utc};
use common::api::{
    Order, OrderId, OrderRequest, OrderStats, OrderStatus, Restriction, RestrictionId,
    RestrictionRequest, Step,
};
use log::{error, info, warn};

use crate::access::{self, Decision, Subnet};
use crate::error::{BarError, Result};
use crate::menu::DrinkMenu;
use crate::notify::Dispatcher;
use crate::repository::{NewOrder, NewRestriction, Repository, StatusSwap};

pub fn build_bar(repository: Arc<dyn Repository>, notifier: Dispatcher) -> Bar {
    Bar {
        menu: Arc::new(Mutex::new(DrinkMenu::default())),
        repository,
        notifier,
    }
}

/// Everything a request handler needs. Clones share the same menu, storage
/// and notifiers.
///
/// Each menu edit holds the lock only for its own read-modify-write, so two
/// admins editing at once see last-writer-wins between their page loads.
#[derive(Clone, Debug)]
pub struct Bar {
    menu: Arc<Mutex<DrinkMenu>>,
    repository: Arc<dyn Repository>,
    notifier: Dispatcher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedOrders {
    pub count: u64,
    pub ids: Vec<OrderId>,
}

impl Bar {
    fn menu(&self) -> Result<MutexGuard<'_, DrinkMenu>> {
        self.menu
            .lock()
            .map_err(|_| BarError::Storage(anyhow!("drink menu lock poisoned")))
    }

    pub fn drinks(&self) -> Result<Vec<String>> {
        Ok(self.menu()?.drinks())
    }

    pub fn add_drink(&self, drink: &str) -> Result<Vec<String>> {
        let drinks = self.menu()?.add(drink)?;
        info!("added drink {:?}", drink.trim());
        Ok(drinks)
    }

    pub fn remove_drink(&self, drink: &str) -> Result<Vec<String>> {
        let drinks = self.menu()?.remove(drink)?;
        info!("removed drink {:?}", drink);
        Ok(drinks)
    }

    pub async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        let name = request.name.trim();
        let drink = request.drink.trim();
        if name.is_empty() || drink.is_empty() {
            return Err(BarError::validation("Name and drink are required"));
        }
        let email = request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        let on_menu = self.menu()?.contains(drink);
        if !on_menu {
            warn!("{} ordered {:?}, which is not on the menu", name, drink);
        }

        let order = self
            .repository
            .insert_order(NewOrder {
                name: name.to_string(),
                drink: drink.to_string(),
                email,
                created_at: Utc::now(),
            })
            .await?;
        info!("order {} placed: {} for {}", order.id, order.drink, order.name);
        self.notifier.order_placed(&order);
        Ok(order)
    }

    pub async fn orders(&self) -> Result<Vec<Order>> {
        Ok(self.repository.list_orders().await?)
    }

    pub async fn ready_orders(&self) -> Result<Vec<Order>> {
        Ok(self
            .repository
            .list_orders_by_status(OrderStatus::Ready)
            .await?)
    }

    pub async fn order(&self, id: OrderId) -> Result<Order> {
        self.repository
            .get_order(id)
            .await?
            .ok_or(BarError::NotFound("Order"))
    }

    pub async fn mark_ready(&self, id: OrderId) -> Result<Order> {
        self.transition(id, OrderStatus::Ready).await
    }

    pub async fn mark_completed(&self, id: OrderId) -> Result<Order> {
        self.transition(id, OrderStatus::Completed).await
    }

    /// Moves an order forward. Asking for the status it already has is a
    /// no-op; asking to move it back is rejected. The ready email goes out
    /// only from the call that actually performed the move.
    async fn transition(&self, id: OrderId, target: OrderStatus) -> Result<Order> {
        let mut order = self.order(id).await?;
        loop {
            match order.status.step_to(target) {
                Step::Advance => {}
                Step::Unchanged => {
                    info!("order {} already {}", id, target);
                    return Ok(order);
                }
                Step::Backward => {
                    return Err(BarError::Validation(format!(
                        "Order {} is already {}",
                        id, order.status
                    )));
                }
            }

            match self
                .repository
                .swap_order_status(id, order.status, target)
                .await?
            {
                StatusSwap::Swapped(updated) => {
                    info!("order {} marked as {}", id, target);
                    if target == OrderStatus::Ready {
                        self.notifier.order_ready(&updated);
                    }
                    return Ok(updated);
                }
                StatusSwap::Conflict(current) => order.status = current,
                StatusSwap::Missing => return Err(BarError::NotFound("Order")),
            }
        }
    }

    pub async fn purge_orders(&self, days: Option<i64>) -> Result<u64> {
        let invalid = || BarError::validation("Valid number of days is required");
        let days = days.filter(|d| *d >= 1).ok_or_else(invalid)?;
        let cutoff = Duration::try_days(days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(invalid)?;
        let purged = self.repository.purge_orders_before(cutoff).await?;
        info!("purged {} orders older than {} days", purged, days);
        Ok(purged)
    }

    pub async fn delete_orders(&self, requested: &[i64]) -> Result<DeletedOrders> {
        if requested.is_empty() {
            return Err(BarError::validation("Valid order IDs array is required"));
        }
        let ids: Vec<OrderId> = requested
            .iter()
            .filter(|id| **id > 0)
            .map(|id| *id as OrderId)
            .collect();
        if ids.is_empty() {
            return Err(BarError::validation("No valid order IDs provided"));
        }
        let count = self.repository.delete_orders(&ids).await?;
        info!("deleted {} orders out of {:?}", count, ids);
        Ok(DeletedOrders { count, ids })
    }

    pub async fn stats(&self) -> Result<OrderStats> {
        Ok(self.repository.count_orders_by_status().await?)
    }

    pub async fn restrictions(&self) -> Result<Vec<Restriction>> {
        Ok(self.repository.list_restrictions().await?)
    }

    pub async fn add_restriction(&self, request: RestrictionRequest) -> Result<Restriction> {
        let subnet = request.subnet.trim();
        if subnet.is_empty() {
            return Err(BarError::validation("Subnet is required"));
        }
        if let Err(e) = subnet.parse::<Subnet>() {
            info!("rejected ip restriction {:?}: {}", subnet, e);
            return Err(BarError::validation(
                "Invalid subnet format. Use CIDR notation (e.g., 192.168.1.0/24)",
            ));
        }
        let restriction = self
            .repository
            .insert_restriction(NewRestriction {
                subnet: subnet.to_string(),
                description: request.description.unwrap_or_default().trim().to_string(),
                enabled: true,
                created_at: Utc::now(),
            })
            .await?;
        info!(
            "added ip restriction {} ({})",
            restriction.subnet, restriction.description
        );
        Ok(restriction)
    }

    pub async fn toggle_restriction(&self, id: RestrictionId) -> Result<Restriction> {
        let restriction = self
            .repository
            .toggle_restriction(id)
            .await?
            .ok_or(BarError::NotFound("IP restriction"))?;
        info!(
            "{} ip restriction {}",
            if restriction.enabled { "enabled" } else { "disabled" },
            restriction.subnet
        );
        Ok(restriction)
    }

    pub async fn remove_restriction(&self, id: RestrictionId) -> Result<Restriction> {
        let restriction = self
            .repository
            .delete_restriction(id)
            .await?
            .ok_or(BarError::NotFound("IP restriction"))?;
        info!(
            "deleted ip restriction {} ({})",
            restriction.subnet, restriction.description
        );
        Ok(restriction)
    }

    /// Returns the restriction that blocks `client`, if any. Storage failures
    /// let the request through.
    pub async fn check_access(&self, client: &str) -> Option<Restriction> {
        let restrictions = match self.repository.enabled_restrictions().await {
            Ok(restrictions) => restrictions,
            Err(e) => {
                error!("could not load ip restrictions, allowing {}: {:#}", client, e);
                return None;
            }
        };
        match access::evaluate(client, &restrictions) {
            Decision::Allow => None,
            Decision::Deny(restriction) => {
                warn!(
                    "blocked access from {} - matches restriction {} ({})",
                    client, restriction.subnet, restriction.description
                );
                Some(restriction.clone())
            }
        }
    }
}
