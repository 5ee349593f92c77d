//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the OAuth
//! authorization flow. The verifier stays in memory for a single
//! authorization attempt and is sent during token exchange; the challenge
//! is included in the authorization URL so the provider can verify the
//! exchange request came from the same party that initiated the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Random bytes behind each verifier. 64 bytes encode to 86 base64url
/// characters, inside RFC 7636's 43-128 range.
const VERIFIER_BYTES: usize = 64;

/// A verifier/challenge pair for one authorization attempt.
///
/// Never persisted. The verifier is zeroed when the pair is dropped.
#[derive(Debug, Clone)]
pub struct PkcePair {
    verifier: Secret<String>,
    challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair from a cryptographically random verifier.
    pub fn generate() -> Self {
        Self::from_verifier(generate_verifier())
    }

    /// Build a pair around a known verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_challenge(&verifier);
        Self {
            verifier: Secret::new(verifier),
            challenge,
        }
    }

    pub fn verifier(&self) -> &Secret<String> {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

/// Generate a cryptographically random PKCE code verifier.
///
/// The output only uses the URL-safe base64 alphabet (`A-Z a-z 0-9 - _`),
/// a subset of the characters RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, always 43 characters.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
