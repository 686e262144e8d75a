//! taskline-runtime: the tokio side of taskline.
//!
//! [`TimelineEngine`](engine::TimelineEngine) wires the poll store, the
//! stream consumer and the hydrator to the pure reconciler, and publishes
//! the merged timeline. The `taskline` binary is a thin CLI over it.

pub mod api;
pub mod config;
pub mod engine;
pub mod hydrator;
pub mod render;
pub mod reset_store;

pub use api::{ApiClient, DetailFetcher};
pub use config::EngineConfig;
pub use engine::{EngineSources, TimelineEngine};
pub use reset_store::{ResetStore, ResetStoreError};
