//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters,
//! enabling controlled testing of application logic.

pub mod clock;
pub mod store;
pub mod verifier;

pub use clock::{MockClock, MOCK_UNIX_START};
pub use store::ScriptedStore;
pub use verifier::MockVerifier;
