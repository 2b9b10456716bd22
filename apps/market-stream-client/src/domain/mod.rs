//! Domain Layer - Canonical market data and subscription tracking.
//!
//! This layer contains the venue-independent types consumers see and the
//! registry that tracks what they asked for. Nothing here performs I/O.

/// Canonical market update types (tickers, trades, order books).
pub mod streaming;

/// Subscription registry and the consumer observer contract.
pub mod subscription;
