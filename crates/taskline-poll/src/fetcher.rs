//! The seam between the store and whatever produces a snapshot.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use taskline_core::FetchError;

/// Produces one JSON snapshot of a resource per call.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self) -> BoxFuture<'static, Result<Value, FetchError>>;
}

/// Any `Fn() -> impl Future` closure is a fetcher.
impl<F, Fut> Fetcher for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    fn fetch(&self) -> BoxFuture<'static, Result<Value, FetchError>> {
        self().boxed()
    }
}
