//! Poll Multiplexer: one shared subscription per resource key.
//!
//! Any number of subscribers may ask for the same key; they share a single
//! timer (running at the fastest requested interval), a single in-flight
//! request per tick, and a single state object. Recognised outage responses
//! suspend the key for a fixed window instead of hammering the backend.

pub mod fetcher;
pub mod state;
pub mod store;

pub use fetcher::Fetcher;
pub use state::PollState;
pub use store::{SUSPENSION_WINDOW, SubscriptionHandle, SubscriptionStore};
