use std::time::Duration;

use orka_core::{CatalogError, TelemetrySink};

/// Per-cycle telemetry through the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsTelemetry;

pub fn sync_result(enabled: bool, error: Option<&CatalogError>) -> &'static str {
    match (enabled, error) {
        (false, _) => "disabled",
        (true, None) => "ok",
        (true, Some(CatalogError::PartialFailure(_))) => "partial",
        (true, Some(_)) => "error",
    }
}

impl TelemetrySink for MetricsTelemetry {
    fn record_catalog(&self, enabled: bool, item_count: usize, resource_count: usize, duration: Duration, error: Option<&CatalogError>) {
        metrics::gauge!("catalog_items", item_count as f64);
        metrics::gauge!("catalog_resources", resource_count as f64);
        metrics::histogram!("catalog_sync_ms", duration.as_secs_f64() * 1000.0);
        metrics::counter!("catalog_sync_total", 1, "result" => sync_result(enabled, error));
    }
}
