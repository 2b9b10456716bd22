//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the venue capability interface, the market directory
//! port, and the dispatch service that turns inbound frames into consumer
//! notifications.

/// Port interfaces for external systems (venue adapter, market directory).
pub mod ports;

/// Application services for frame dispatch and fan-out.
pub mod services;
