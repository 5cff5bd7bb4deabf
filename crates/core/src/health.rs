use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum HealthState {
    #[default]
    Unknown,
    Ok,
    /// Some, but not all, descriptors failed in the last cycle.
    Degraded,
    /// The last cycle produced no fresh data at all.
    Error,
}

/// Catalog freshness as observed after the most recent cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HealthStatus {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Served data may be last-known rather than fresh.
    pub stale: bool,
    pub failed_resource_count: usize,
}
