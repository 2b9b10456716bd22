//! WebSocket Connection Management
//!
//! Venue-independent machinery around the single outbound connection:
//!
//! - **client**: connection supervisor and consumer API
//! - **connection**: writer task and shared connection slot
//! - **heartbeat**: periodic liveness probe
//! - **reconnect**: backoff between connection attempts

pub mod client;
pub mod connection;
pub mod heartbeat;
pub mod reconnect;

pub use client::{ConnectionState, StreamClient, StreamClientConfig, StreamClientError};
pub use connection::{
    ConnectionError, ConnectionHandle, ConnectionSlot, DEFAULT_WRITE_QUEUE, spawn_writer,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatOutcome, HeartbeatStats, HeartbeatTask};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
