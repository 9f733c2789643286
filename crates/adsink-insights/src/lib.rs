//! Rate-limited client for the upstream advertising insights API.
//!
//! [`InsightsClient`] executes one chunk's request and classifies the outcome
//! (success, throttled with a wait hint, transient, fatal);
//! [`fetch_with_retry`] wraps it in a bounded, cancellable retry policy.

mod client;
mod error;
mod retry;
mod types;

pub use client::InsightsClient;
pub use error::{FetchClass, InsightsError};
pub use retry::{fetch_with_retry, RetryPolicy};
pub use types::InsightRow;
