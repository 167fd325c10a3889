//! Domain layer - pure admission logic with no external dependencies.
//!
//! This layer contains the core concepts and invariants of the gatekeeper:
//! - Request identity and token rejection reasons
//! - Rate-limit key derivation
//! - Protected route matching
//! - Fixed-window quota policy
//!
//! All types in this layer are pure and easily testable.

pub mod identity;
pub mod key;
pub mod policy;
pub mod route;
