use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use orka_core::{CatalogError, HealthState, HealthStatus, PartialFailure};

/// Post-cycle health, written only by the orchestrator.
#[derive(Default)]
pub struct HealthTracker {
    status: Mutex<HealthStatus>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HealthStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> HealthStatus {
        self.lock().clone()
    }

    pub fn record_success(&self, at: DateTime<Utc>) {
        let mut h = self.lock();
        h.state = HealthState::Ok;
        h.consecutive_failures = 0;
        h.last_sync_time = Some(at);
        h.last_success_time = Some(at);
        h.last_error = None;
        h.stale = false;
        h.failed_resource_count = 0;
    }

    /// Some descriptors failed; `succeeded` counts those collected fresh.
    pub fn record_partial(&self, at: DateTime<Utc>, failure: &PartialFailure, succeeded: usize) {
        let state = if succeeded > 0 { HealthState::Degraded } else { HealthState::Error };
        let mut h = self.lock();
        Self::fail(&mut h, state, at, failure.to_string());
        h.failed_resource_count = failure.failed.len();
    }

    /// The whole cycle failed before collection (e.g. discovery).
    pub fn record_error(&self, at: DateTime<Utc>, error: &CatalogError) {
        let mut h = self.lock();
        Self::fail(&mut h, HealthState::Error, at, error.to_string());
    }

    fn fail(h: &mut HealthStatus, state: HealthState, at: DateTime<Utc>, message: String) {
        h.state = state;
        h.consecutive_failures = h.consecutive_failures.saturating_add(1);
        h.last_sync_time = Some(at);
        h.last_error = Some(message);
        h.stale = true;
    }
}
