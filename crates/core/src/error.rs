//! Error taxonomy for catalog cycles.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by catalog operations.
///
/// `Discovery` and `Cancelled` end a whole cycle without touching the store.
/// `List`, `Permission` and `Index` are fatal to one descriptor only and are
/// folded into a [`PartialFailure`] by the orchestrator.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CatalogError {
    #[error("discovery: {0}")]
    Discovery(String),
    #[error("permission {resource}: {message}")]
    Permission { resource: String, message: String },
    #[error("list {resource}: {message}")]
    List { resource: String, message: String },
    #[error("index {resource}: {message}")]
    Index { resource: String, message: String },
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    PartialFailure(#[from] PartialFailure),
    #[error("config: {0}")]
    Config(String),
}

impl CatalogError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CatalogError::Cancelled)
    }

    pub fn partial(&self) -> Option<&PartialFailure> {
        match self {
            CatalogError::PartialFailure(p) => Some(p),
            _ => None,
        }
    }
}

/// A cycle that kept good data for most descriptors but failed some.
/// `failed` holds descriptor identities, sorted.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("partial failure: {} of {total} resources failed ({}): {}", .failed.len(), .failed.join(", "), .causes.join("; "))]
pub struct PartialFailure {
    pub failed: Vec<String>,
    pub causes: Vec<String>,
    pub total: usize,
}

/// Outcome classification for a single wire list call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListError {
    /// Rate limited, timed out, internal or unavailable; worth retrying.
    #[error("transient: {0}")]
    Transient(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Fatal(String),
}

impl ListError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ListError::Transient(_))
    }
}
