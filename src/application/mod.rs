//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Request gate (authenticate, key, count, decide)
//! - Circuit breaker (bounded fail-open on store outages)
//! - Metrics (admission counters)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod circuit_breaker;
pub mod gate;
pub mod metrics;
pub mod ports;
