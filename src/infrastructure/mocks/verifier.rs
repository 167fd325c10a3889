//! Table-driven token verifier.

use crate::application::ports::IdentityVerifier;
use crate::domain::identity::{Identity, InvalidToken};
use std::collections::HashMap;

/// Verifier that maps literal tokens to outcomes.
///
/// Unknown tokens fail with [`InvalidToken::BadSignature`].
#[derive(Debug, Clone, Default)]
pub struct MockVerifier {
    outcomes: HashMap<String, Result<Identity, InvalidToken>>,
}

impl MockVerifier {
    /// Create a verifier that rejects everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `subject`.
    pub fn with_identity(mut self, token: &str, subject: &str) -> Self {
        let identity = Identity::new(subject).expect("mock subject must not be blank");
        self.outcomes.insert(token.to_string(), Ok(identity));
        self
    }

    /// Reject `token` with `reason`.
    pub fn with_failure(mut self, token: &str, reason: InvalidToken) -> Self {
        self.outcomes.insert(token.to_string(), Err(reason));
        self
    }
}

impl IdentityVerifier for MockVerifier {
    fn verify(&self, token: &str, _now_unix: u64) -> Result<Identity, InvalidToken> {
        self.outcomes
            .get(token)
            .cloned()
            .unwrap_or(Err(InvalidToken::BadSignature))
    }
}
