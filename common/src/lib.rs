pub mod api {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;
    use std::str::FromStr;

    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    pub type OrderId = u64;
    pub type RestrictionId = u64;

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Order {
        pub id: OrderId,
        pub name: String,
        pub drink: String,
        pub email: Option<String>,
        pub status: OrderStatus,
        #[serde(rename = "timestamp")]
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum OrderStatus {
        Pending,
        Ready,
        Completed,
    }

    /// How a requested status relates to the current one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Step {
        Advance,
        Unchanged,
        Backward,
    }

    impl OrderStatus {
        pub fn as_str(&self) -> &'static str {
            match self {
                OrderStatus::Pending => "pending",
                OrderStatus::Ready => "ready",
                OrderStatus::Completed => "completed",
            }
        }

        /// Orders only move forward: pending -> ready -> completed. Skipping
        /// `ready` on the way to `completed` counts as moving forward.
        pub fn step_to(self, target: OrderStatus) -> Step {
            use std::cmp::Ordering;

            match self.rank().cmp(&target.rank()) {
                Ordering::Less => Step::Advance,
                Ordering::Equal => Step::Unchanged,
                Ordering::Greater => Step::Backward,
            }
        }

        fn rank(self) -> u8 {
            match self {
                OrderStatus::Pending => 0,
                OrderStatus::Ready => 1,
                OrderStatus::Completed => 2,
            }
        }
    }

    impl fmt::Display for OrderStatus {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ParseStatusError {
        pub value: String,
    }

    impl fmt::Display for ParseStatusError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "unknown order status {:?}", &self.value)
        }
    }
    impl Error for ParseStatusError {}

    impl FromStr for OrderStatus {
        type Err = ParseStatusError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "pending" => Ok(OrderStatus::Pending),
                "ready" => Ok(OrderStatus::Ready),
                "completed" => Ok(OrderStatus::Completed),
                other => Err(ParseStatusError {
                    value: other.to_string(),
                }),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Restriction {
        pub id: RestrictionId,
        pub subnet: String,
        pub description: String,
        pub enabled: bool,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OrderStats {
        pub total: u64,
        pub pending: u64,
        pub ready: u64,
        pub completed: u64,
    }

    impl OrderStats {
        pub fn record(&mut self, status: OrderStatus) {
            self.total += 1;
            match status {
                OrderStatus::Pending => self.pending += 1,
                OrderStatus::Ready => self.ready += 1,
                OrderStatus::Completed => self.completed += 1,
            }
        }
    }

    // Missing text fields decode as empty so the service can answer with a
    // descriptive validation error instead of a body parse failure.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct OrderRequest {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub drink: String,
        #[serde(default)]
        pub email: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OrderPlaced {
        pub id: OrderId,
        pub message: String,
        pub name: String,
        pub drink: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OrderUpdated {
        pub message: String,
        pub order: Order,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct DrinkRequest {
        #[serde(default)]
        pub drink: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DrinksChanged {
        pub message: String,
        pub drinks: Vec<String>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct PurgeRequest {
        #[serde(default)]
        pub days: Option<i64>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Purged {
        pub message: String,
        #[serde(rename = "deletedCount")]
        pub deleted_count: u64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct DeleteOrdersRequest {
        #[serde(rename = "orderIds", default)]
        pub order_ids: Vec<i64>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OrdersDeleted {
        pub message: String,
        #[serde(rename = "deletedCount")]
        pub deleted_count: u64,
        #[serde(rename = "requestedIds")]
        pub requested_ids: Vec<i64>,
        #[serde(rename = "deletedIds")]
        pub deleted_ids: Vec<OrderId>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct RestrictionRequest {
        #[serde(default)]
        pub subnet: String,
        #[serde(default)]
        pub description: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RestrictionAdded {
        pub id: RestrictionId,
        pub message: String,
        pub subnet: String,
        pub description: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RestrictionToggled {
        pub message: String,
        pub enabled: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RestrictionRemoved {
        pub message: String,
        pub subnet: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ErrorBody {
        pub error: String,
    }
}
