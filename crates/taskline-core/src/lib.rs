//! taskline-core: pure reconciliation domain for the task console timeline.
//!
//! Holds the wire payload types, the per-task stream buffer reducer, the
//! timeline Reconciler, the session reset boundary and the hydration planner.
//! Nothing in this crate performs IO; every function takes `now` explicitly.

pub mod buffer;
pub mod error;
pub mod hydration;
pub mod local;
pub mod reconcile;
pub mod reset;
pub mod runtime_meta;
pub mod snapshot;
pub mod stream_event;
pub mod time;
pub mod types;

pub use buffer::{ApplyOutcome, TaskStreamBuffer};
pub use error::{FetchError, StreamError};
pub use hydration::{HydratedResult, HydrationTracker};
pub use local::LocalTimeline;
pub use reconcile::{ReconcileInputs, reconcile};
pub use reset::{ResetMarkers, passes_reset};
pub use stream_event::{StreamEvent, StreamEventKind, parse_event};
pub use types::{Role, TaskStatus, Timeline, TimelineEntry};
