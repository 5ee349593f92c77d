//! The issued access/refresh token pair
//!
//! A [`Credential`] on its own is detached: it knows nothing about where it
//! is stored, so refreshing it yields a new in-memory value the caller must
//! persist explicitly. Credentials read from a
//! [`CredentialStore`](crate::store::CredentialStore) come back as
//! [`AttachedCredential`](crate::store::AttachedCredential)s, whose refresh
//! persists automatically.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::EXPIRY_MARGIN_MILLIS;
use crate::error::{Error, Result};
use crate::token::TokenClient;

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One account's OAuth credential.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a
/// delta), computed when the token response was decoded. This struct is
/// also the persisted record: its JSON serialization is what the secure
/// storage backend holds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token for API calls
    pub access_token: String,
    /// Long-lived token used only for refresh exchanges
    pub refresh_token: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Stable identifier of the authenticated account; the store's primary key
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("account_id", &self.account_id)
            .field("team_id", &self.team_id)
            .finish()
    }
}

impl Credential {
    /// True when less than 30 seconds of validity remain.
    pub fn has_expired(&self) -> bool {
        self.expires_within(Duration::from_millis(EXPIRY_MARGIN_MILLIS))
    }

    /// True when less than `margin` of validity remains (or the token is
    /// already past its expiry).
    pub fn expires_within(&self, margin: Duration) -> bool {
        let remaining = self.expires_at.saturating_sub(now_millis());
        u128::from(remaining) < margin.as_millis()
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Sign an outbound request with this credential's access token.
    pub fn sign(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.access_token)
    }

    /// Refresh without persisting.
    ///
    /// Unless `force` is set, a credential that has not expired is returned
    /// as-is without touching the network. The caller owns persistence of
    /// the returned value.
    pub async fn refresh(&self, client: &TokenClient, force: bool) -> Result<Credential> {
        if !force && !self.has_expired() {
            return Ok(self.clone());
        }
        client.refresh_token(self).await
    }

    /// Encode as the persisted record.
    pub fn to_record(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Decode(format!("encoding credential: {e}")))
    }

    /// Decode a persisted record.
    pub fn from_record(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Decode(format!("decoding stored credential: {e}")))
    }
}
