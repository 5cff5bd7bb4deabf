//! Permission evaluation via SelfSubjectAccessReview.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use k8s_openapi::api::authorization::v1::{ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec};
use kube::{
    api::{Api, PostParams},
    Client,
};
use tracing::debug;

use orka_core::{AccessCheck, AccessDecision, CatalogError, PermissionEvaluator};

const REVIEW_CONCURRENCY: usize = 16;

/// There is no batch SSAR endpoint, so a "batch" is the set of reviews
/// issued concurrently. The batch fails as a whole only when every review
/// failed to reach the server.
#[derive(Clone)]
pub struct KubeAuthorizer {
    client: Client,
}

impl KubeAuthorizer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn review(&self, check: &AccessCheck) -> Result<bool, kube::Error> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let ra = ResourceAttributes {
            group: if check.group.is_empty() { None } else { Some(check.group.clone()) },
            version: Some(check.version.clone()),
            resource: Some(check.resource.clone()),
            verb: Some(check.verb.clone()),
            namespace: None,
            ..Default::default()
        };
        let ssar = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec { resource_attributes: Some(ra), ..Default::default() },
            ..Default::default()
        };
        let created = api.create(&PostParams::default(), &ssar).await?;
        Ok(created.status.map(|s| s.allowed).unwrap_or(false))
    }
}

#[async_trait]
impl PermissionEvaluator for KubeAuthorizer {
    async fn evaluate(&self, checks: &[AccessCheck]) -> Result<Vec<AccessDecision>, CatalogError> {
        let reviews: Vec<_> = checks.iter().map(|c| self.review(c)).collect();
        let results: Vec<Result<bool, kube::Error>> = stream::iter(reviews)
            .buffered(REVIEW_CONCURRENCY)
            .collect()
            .await;

        if !results.is_empty() && results.iter().all(|r| r.is_err()) {
            let first = results.iter().find_map(|r| r.as_ref().err()).map(|e| e.to_string()).unwrap_or_default();
            return Err(CatalogError::Permission { resource: "*".into(), message: format!("access review batch failed: {}", first) });
        }

        let decisions: Vec<AccessDecision> = results
            .into_iter()
            .map(|r| match r {
                Ok(allowed) => AccessDecision { allowed, error: None },
                Err(e) => AccessDecision { allowed: false, error: Some(e.to_string()) },
            })
            .collect();
        let allowed = decisions.iter().filter(|d| d.allowed).count();
        debug!(checks = checks.len(), allowed, "kubehub: access reviews done");
        Ok(decisions)
    }
}
