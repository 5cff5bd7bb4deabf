//! Orka catalog: a continuously refreshed, access-gated, in-memory catalog
//! of cluster objects.
//!
//! [`CatalogService`] owns the store and runs cycles; the collaborators it
//! talks to are the traits in `orka-core`.

#![forbid(unsafe_code)]

pub mod collector;
pub mod config;
pub mod gate;
pub mod health;
pub mod promotion;
pub mod service;
pub mod telemetry;

pub use collector::{Collected, CollectError, Collector, RetryPolicy, SharedIndexes, Tier};
pub use config::CatalogConfig;
pub use gate::{Access, BatchVerdict, PermissionGate};
pub use health::HealthTracker;
pub use promotion::{PromotedRead, PromotionManager};
pub use service::{CatalogService, CatalogServiceBuilder, SyncReport};
pub use telemetry::MetricsTelemetry;

pub use orka_search::{Query, QueryPage};
