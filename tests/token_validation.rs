//! Token validator properties and key rotation under load.

mod common;

use common::{token_for, SECRET};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use proptest::prelude::*;
use quota_gate::{IdentityVerifier, InvalidToken, KeySet, TokenValidator, VerificationKey};
use serde_json::json;
use std::sync::Arc;

const NOW: u64 = 1_700_000_000;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A valid token yields the same identity every time it is checked.
    #[test]
    fn test_valid_tokens_are_deterministic(
        user in 1u64..1_000_000,
        ttl in 1u64..86_400,
        elapsed in 0u64..86_400,
    ) {
        let validator = common::validator();
        let subject = format!("user-{}", user);
        let token = token_for(&subject, NOW, ttl);
        let at = NOW + elapsed % ttl;

        let first = validator.verify(&token, at).unwrap();
        let second = validator.verify(&token, at).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.as_str(), subject.as_str());
    }

    /// Checking at or after `exp` always fails as expired.
    #[test]
    fn test_tokens_past_expiry_always_fail(offset in 0u64..10_000, late in 0u64..100_000) {
        let validator = common::validator();
        let exp = NOW + offset;
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "sub": "alice", "exp": exp }),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        prop_assert_eq!(validator.verify(&token, exp + late), Err(InvalidToken::Expired));
    }
}

#[test]
fn test_tampered_payload_fails_signature() {
    let validator = common::validator();
    let token = token_for("alice", NOW, 60);
    let other = token_for("mallory", NOW, 60);

    // Alice's header and signature around Mallory's claims
    let parts: Vec<&str> = token.split('.').collect();
    let other_parts: Vec<&str> = other.split('.').collect();
    let spliced = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);

    assert_eq!(validator.verify(&spliced, NOW), Err(InvalidToken::BadSignature));
}

#[tokio::test]
async fn test_reload_while_validating() {
    let validator = Arc::new(common::validator());
    let token = token_for("alice", NOW, 3_600);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let validator = Arc::clone(&validator);
            let token = token.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    // Every reload keeps the same secret, so every read must succeed
                    assert!(validator.verify(&token, NOW).is_ok());
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for _ in 0..50 {
        let keys = KeySet::single(VerificationKey::hmac(Algorithm::HS256, SECRET).unwrap());
        validator.reload(keys).unwrap();
        tokio::task::yield_now().await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(validator.key_version(), 51);
}

#[test]
fn test_rotation_with_kid_overlap() {
    let old = VerificationKey::hmac(Algorithm::HS256, b"old-secret").unwrap();
    let new = VerificationKey::hmac(Algorithm::HS256, b"new-secret").unwrap();
    let validator = TokenValidator::new(
        KeySet::default().with_kid("old", old.clone()),
        Default::default(),
    )
    .unwrap();

    let mint = |kid: &str, secret: &[u8]| {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        encode(
            &header,
            &json!({ "sub": "alice", "exp": NOW + 60 }),
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    };
    let old_token = mint("old", b"old-secret");
    let new_token = mint("new", b"new-secret");

    assert!(validator.verify(&old_token, NOW).is_ok());
    assert_eq!(validator.verify(&new_token, NOW), Err(InvalidToken::UnknownKey));

    // Both keys accepted during the overlap
    validator
        .reload(KeySet::default().with_kid("old", old).with_kid("new", new.clone()))
        .unwrap();
    assert!(validator.verify(&old_token, NOW).is_ok());
    assert!(validator.verify(&new_token, NOW).is_ok());

    validator.reload(KeySet::default().with_kid("new", new)).unwrap();
    assert_eq!(validator.verify(&old_token, NOW), Err(InvalidToken::UnknownKey));
}
