//! Progress event fan-out.
//!
//! Events are produced by dispatcher workers and the coordinator and
//! consumed by an outside streaming layer through a subscription; the core
//! carries no transport choice.

pub mod publisher;
pub mod types;

pub use publisher::EventPublisher;
pub use types::{ProgressEvent, PublishedEvent};
