//! Hydrator driver: performs the detail fetches a [`HydrationTracker`] plans.
//!
//! [`HydrationTracker`]: taskline_core::HydrationTracker

use std::sync::Arc;

use futures_util::future::join_all;
use taskline_core::HydratedResult;
use taskline_core::HydrationTracker;

use crate::api::DetailFetcher;

#[derive(Clone)]
pub struct Hydrator {
    details: Arc<dyn DetailFetcher>,
}

impl Hydrator {
    pub fn new(details: Arc<dyn DetailFetcher>) -> Self {
        Self { details }
    }

    /// Fetch every planned id concurrently, one request each, and keep the
    /// details that still belong to `session` and carry a result.
    ///
    /// Not-found is expected for pruned tasks and only logged at debug.
    /// Other failures are logged and skipped.
    pub async fn run_pending(&self, planned: Vec<String>, session: Option<String>) -> Vec<HydratedResult> {
        let fetches = planned.into_iter().map(|cid| {
            let request = self.details.fetch_detail(&cid);
            async move { (cid, request.await) }
        });

        let mut hydrated = Vec::new();
        for (cid, result) in join_all(fetches).await {
            match result {
                Ok(detail) => match HydrationTracker::accept(&cid, &detail, session.as_deref()) {
                    Some(found) => hydrated.push(found),
                    None => tracing::debug!(correlation_id = %cid, "hydrate: detail ignored"),
                },
                Err(e) if e.is_not_found() => {
                    tracing::debug!(correlation_id = %cid, "hydrate: task no longer exists");
                }
                Err(e) => {
                    tracing::warn!(correlation_id = %cid, error = %e, "hydrate: detail fetch failed");
                }
            }
        }
        hydrated
    }
}
