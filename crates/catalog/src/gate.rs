//! Permission gate: decides which descriptors may be collected at all.

use std::sync::Arc;

use tracing::{debug, warn};

use orka_core::{AccessCheck, CatalogError, PermissionEvaluator, ResourceDescriptor};

/// Per-index outcome of one batched evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchVerdict {
    pub allowed: Vec<bool>,
    pub errors: Vec<Option<String>>,
}

impl BatchVerdict {
    fn allow_all(n: usize) -> Self {
        Self { allowed: vec![true; n], errors: vec![None; n] }
    }

    /// Settled decision for index `i`; `None` when that entry errored or is
    /// missing and needs a single evaluation.
    pub fn get(&self, i: usize) -> Option<bool> {
        match self.errors.get(i) {
            Some(None) => self.allowed.get(i).copied(),
            _ => None,
        }
    }
}

/// Final access for one descriptor in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
    /// Evaluation itself failed; treated as not allowed and reported.
    Errored(String),
}

#[derive(Clone, Default)]
pub struct PermissionGate {
    evaluator: Option<Arc<dyn PermissionEvaluator>>,
}

impl PermissionGate {
    pub fn new(evaluator: Option<Arc<dyn PermissionEvaluator>>) -> Self {
        Self { evaluator }
    }

    pub fn is_open(&self) -> bool {
        self.evaluator.is_none()
    }

    /// One `list` check per descriptor in a single evaluator call. `Err`
    /// means the call failed outright and callers fall back to [`Self::evaluate`].
    pub async fn evaluate_batch(&self, descriptors: &[ResourceDescriptor]) -> Result<BatchVerdict, CatalogError> {
        let Some(ev) = &self.evaluator else {
            return Ok(BatchVerdict::allow_all(descriptors.len()));
        };
        let checks: Vec<AccessCheck> = descriptors.iter().enumerate().map(|(i, d)| AccessCheck::list(i, d)).collect();
        let decisions = ev.evaluate(&checks).await?;
        if decisions.len() != checks.len() {
            return Err(CatalogError::Permission {
                resource: "*".into(),
                message: format!("evaluator answered {} of {} checks", decisions.len(), checks.len()),
            });
        }
        let verdict = BatchVerdict {
            allowed: decisions.iter().map(|d| d.allowed && d.error.is_none()).collect(),
            errors: decisions.into_iter().map(|d| d.error).collect(),
        };
        debug!(
            checks = checks.len(),
            denied = verdict.allowed.iter().filter(|a| !**a).count(),
            errored = verdict.errors.iter().filter(|e| e.is_some()).count(),
            "catalog: batch permission check"
        );
        Ok(verdict)
    }

    pub async fn evaluate(&self, descriptor: &ResourceDescriptor) -> Result<bool, CatalogError> {
        let Some(ev) = &self.evaluator else { return Ok(true) };
        let decisions = ev.evaluate(&[AccessCheck::list(0, descriptor)]).await?;
        match decisions.into_iter().next() {
            Some(d) => match d.error {
                Some(message) => Err(CatalogError::Permission { resource: descriptor.identity(), message }),
                None => Ok(d.allowed),
            },
            None => Err(CatalogError::Permission { resource: descriptor.identity(), message: "no decision returned".into() }),
        }
    }

    /// Use the batch answer when it settled this descriptor, else evaluate it alone.
    pub async fn resolve(&self, descriptor: &ResourceDescriptor, batched: Option<bool>) -> Access {
        if let Some(allowed) = batched {
            return if allowed { Access::Allowed } else { Access::Denied };
        }
        match self.evaluate(descriptor).await {
            Ok(true) => Access::Allowed,
            Ok(false) => Access::Denied,
            Err(e) => {
                warn!(resource = %descriptor.identity(), error = %e, "catalog: permission evaluation failed");
                Access::Errored(e.to_string())
            }
        }
    }
}
