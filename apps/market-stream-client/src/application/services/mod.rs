//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Dispatcher`: Matches inbound frames to subscriptions, parses once,
//!   fans out to consumers, and broadcasts the reset signal

mod dispatcher;

pub use dispatcher::{DispatchOutcome, Dispatcher, Routed};
