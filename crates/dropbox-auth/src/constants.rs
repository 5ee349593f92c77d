//! Dropbox OAuth constants
//!
//! Endpoint URLs and the fixed authorization parameters. Changing any of
//! the authorization defaults breaks compatibility with the provider and
//! must be done as an explicit, versioned change.

/// Authorization endpoint opened in the user's browser.
pub const AUTHORIZE_ENDPOINT: &str = "https://www.dropbox.com/oauth2/authorize";

/// Token endpoint for code exchange and token refresh.
pub const TOKEN_ENDPOINT: &str = "https://api.dropbox.com/oauth2/token";

/// Requests a refresh token alongside the short-lived access token.
pub const TOKEN_ACCESS_TYPE: &str = "offline";

/// Only existing Dropbox users may authorize the app.
pub const DISABLE_SIGNUP: &str = "true";

/// PKCE challenge method. Only S256 is supported.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Suffix appended to the host application identity to form the secure
/// storage namespace. Changing it orphans every stored credential.
pub const STORAGE_NAMESPACE_SUFFIX: &str = "dropbox.authv2";

/// A token is treated as expired this many milliseconds before its actual
/// expiry, leaving room for in-flight request latency.
pub const EXPIRY_MARGIN_MILLIS: u64 = 30_000;

/// Default transport timeout for token endpoint calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Build the default redirect URI for an app key (`db-<key>://2/token`).
pub fn default_redirect_uri(app_key: &str) -> String {
    format!("db-{app_key}://2/token")
}

/// Derive the secure storage namespace from the host application identity.
pub fn storage_namespace(app_identity: &str) -> String {
    format!("{app_identity}.{STORAGE_NAMESPACE_SUFFIX}")
}
