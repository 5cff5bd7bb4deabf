//! Catalog tuning, read from `ORKA_CATALOG_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use orka_core::CatalogError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub enabled: bool,
    pub sync_interval: Duration,
    pub eviction_ttl: Duration,
    /// Descriptors collected concurrently within one cycle.
    pub max_concurrency: usize,
    /// Per-descriptor namespace listing fan-out.
    pub namespace_concurrency: usize,
    pub page_size: u32,
    /// Total attempts per page request, first try included.
    pub retry_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub promotion_threshold: usize,
    pub promotion_sync_timeout: Duration,
    pub discovery_timeout: Duration,
    /// Namespaces to collect; empty means all.
    pub namespaces: Vec<String>,
}

pub fn default_concurrency() -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cores * 4).max(32)
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval: Duration::from_secs(60),
            eviction_ttl: Duration::from_secs(600),
            max_concurrency: default_concurrency(),
            namespace_concurrency: 16,
            page_size: 500,
            retry_attempts: 3,
            retry_base: Duration::from_millis(200),
            retry_max: Duration::from_millis(2000),
            promotion_threshold: 5000,
            promotion_sync_timeout: Duration::from_secs(60),
            discovery_timeout: Duration::from_secs(30),
            namespaces: Vec::new(),
        }
    }
}

impl CatalogConfig {
    /// Defaults overridden by any well-formed `ORKA_CATALOG_*` variable.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;
        let mut cfg = Self::default();
        if let Some(v) = lookup("ORKA_CATALOG_ENABLED") {
            match v.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "no" | "off" => cfg.enabled = false,
                "1" | "true" | "yes" | "on" => cfg.enabled = true,
                _ => {}
            }
        }
        if let Some(s) = parsed::<u64>(lookup, "ORKA_CATALOG_INTERVAL_SECS") {
            cfg.sync_interval = Duration::from_secs(s);
        }
        if let Some(s) = parsed::<u64>(lookup, "ORKA_CATALOG_TTL_SECS") {
            cfg.eviction_ttl = Duration::from_secs(s);
        }
        if let Some(n) = parsed(lookup, "ORKA_CATALOG_CONCURRENCY") {
            cfg.max_concurrency = n;
        }
        if let Some(n) = parsed(lookup, "ORKA_CATALOG_NS_CONCURRENCY") {
            cfg.namespace_concurrency = n;
        }
        if let Some(n) = parsed(lookup, "ORKA_CATALOG_PAGE_SIZE") {
            cfg.page_size = n;
        }
        if let Some(n) = parsed(lookup, "ORKA_CATALOG_RETRY_ATTEMPTS") {
            cfg.retry_attempts = n;
        }
        if let Some(ms) = parsed::<u64>(lookup, "ORKA_CATALOG_RETRY_BASE_MS") {
            cfg.retry_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>(lookup, "ORKA_CATALOG_RETRY_MAX_MS") {
            cfg.retry_max = Duration::from_millis(ms);
        }
        if let Some(n) = parsed(lookup, "ORKA_CATALOG_PROMOTE_THRESHOLD") {
            cfg.promotion_threshold = n;
        }
        if let Some(s) = parsed::<u64>(lookup, "ORKA_CATALOG_PROMOTE_TIMEOUT_SECS") {
            cfg.promotion_sync_timeout = Duration::from_secs(s);
        }
        if let Some(s) = parsed::<u64>(lookup, "ORKA_CATALOG_DISCOVERY_TIMEOUT_SECS") {
            cfg.discovery_timeout = Duration::from_secs(s);
        }
        if let Some(list) = lookup("ORKA_CATALOG_NAMESPACES") {
            cfg.namespaces = list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        cfg
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let zero = |what: &str| Err(CatalogError::Config(format!("{} must be greater than zero", what)));
        if self.max_concurrency == 0 {
            return zero("max_concurrency");
        }
        if self.namespace_concurrency == 0 {
            return zero("namespace_concurrency");
        }
        if self.page_size == 0 {
            return zero("page_size");
        }
        if self.retry_attempts == 0 {
            return zero("retry_attempts");
        }
        if self.sync_interval.is_zero() {
            return zero("sync_interval");
        }
        if self.retry_max < self.retry_base {
            return Err(CatalogError::Config("retry_max must not be below retry_base".into()));
        }
        Ok(())
    }
}
