//! Auth configuration
//!
//! Config precedence: env vars > config file > defaults. The app key may
//! come from `DROPBOX_APP_KEY` so it does not have to live in the TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::constants::{AUTHORIZE_ENDPOINT, DEFAULT_TIMEOUT_SECS, TOKEN_ENDPOINT, default_redirect_uri};
use crate::error::{Error, Result};

/// Env var overriding the file's `app_key`.
pub const APP_KEY_ENV: &str = "DROPBOX_APP_KEY";

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "DROPBOX_AUTH_CONFIG";

/// Identity of the app being authorized and where to reach the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// The app key from the Dropbox developer console, used as `client_id`.
    #[serde(default)]
    pub app_key: String,
    /// Stable identity of the host application (e.g. a bundle identifier).
    /// Scopes the secure storage namespace.
    pub app_identity: String,
    /// Defaults to `db-<app_key>://2/token`.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_authorize_endpoint")]
    pub authorize_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    /// Transport timeout for token endpoint calls.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_authorize_endpoint() -> String {
    AUTHORIZE_ENDPOINT.to_string()
}

fn default_token_endpoint() -> String {
    TOKEN_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl AuthConfig {
    pub fn new(app_key: impl Into<String>, app_identity: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_identity: app_identity.into(),
            redirect_uri: None,
            authorize_endpoint: default_authorize_endpoint(),
            token_endpoint: default_token_endpoint(),
            timeout_secs: default_timeout(),
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_endpoints(
        mut self,
        authorize_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.authorize_endpoint = authorize_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self
    }

    /// Load from a TOML file, overlay `DROPBOX_APP_KEY`, then validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: AuthConfig = common::load_toml(path)?;
        if let Ok(key) = std::env::var(APP_KEY_ENV) {
            let key = key.trim();
            if !key.is_empty() {
                config.app_key = key.to_string();
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path: CLI arg, `DROPBOX_AUTH_CONFIG`, then
    /// `dropbox-auth.toml`.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        common::resolve_config_path(cli_path, CONFIG_PATH_ENV, "dropbox-auth.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "app_key is required (set it in the config file or {APP_KEY_ENV})"
            )));
        }
        if self.app_identity.trim().is_empty() {
            return Err(Error::Config("app_identity must not be empty".into()));
        }
        for (name, endpoint) in [
            ("authorize_endpoint", &self.authorize_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            let url = Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("{name} is not a valid URL: {e}")))?;
            if url.scheme() != "https" && url.scheme() != "http" {
                return Err(Error::Config(format!(
                    "{name} must use http:// or https://, got: {endpoint}"
                )));
            }
        }
        self.callback_scheme()?;
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }

    /// The effective redirect URI.
    pub fn redirect_uri(&self) -> String {
        self.redirect_uri
            .clone()
            .unwrap_or_else(|| default_redirect_uri(&self.app_key))
    }

    /// Scheme the presentation surface should watch for the callback.
    pub fn callback_scheme(&self) -> Result<String> {
        let redirect_uri = self.redirect_uri();
        Url::parse(&redirect_uri)
            .map(|url| url.scheme().to_string())
            .map_err(|e| Error::Config(format!("redirect_uri {redirect_uri} is not a valid URL: {e}")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("dropbox-auth.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(APP_KEY_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "app_key = \"key1\"\napp_identity = \"com.example.notes\"\n",
        );

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.app_key, "key1");
        assert_eq!(config.redirect_uri(), "db-key1://2/token");
        assert_eq!(config.callback_scheme().unwrap(), "db-key1");
        assert_eq!(config.authorize_endpoint, AUTHORIZE_ENDPOINT);
        assert_eq!(config.token_endpoint, TOKEN_ENDPOINT);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn env_app_key_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "app_key = \"from-file\"\napp_identity = \"com.example.notes\"\n",
        );

        unsafe { set_env(APP_KEY_ENV, "from-env") };
        let config = AuthConfig::load(&path);
        unsafe { remove_env(APP_KEY_ENV) };

        assert_eq!(config.unwrap().app_key, "from-env");
    }

    #[test]
    fn missing_app_key_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(APP_KEY_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "app_identity = \"com.example.notes\"\n");

        let result = AuthConfig::load(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(matches!(AuthConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn custom_redirect_and_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(APP_KEY_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
app_key = "key1"
app_identity = "com.example.notes"
redirect_uri = "myapp://oauth/callback"
timeout_secs = 5
"#,
        );

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.redirect_uri(), "myapp://oauth/callback");
        assert_eq!(config.callback_scheme().unwrap(), "myapp");
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = AuthConfig::new("key1", "com.example.notes");
        assert!(base.validate().is_ok());

        let bad_endpoint = base.clone().with_endpoints("ftp://example.com/auth", TOKEN_ENDPOINT);
        assert!(matches!(bad_endpoint.validate(), Err(Error::Config(_))));

        let bad_redirect = base.clone().with_redirect_uri("not a url");
        assert!(matches!(bad_redirect.validate(), Err(Error::Config(_))));

        let zero_timeout = AuthConfig {
            timeout_secs: 0,
            ..base.clone()
        };
        assert!(matches!(zero_timeout.validate(), Err(Error::Config(_))));

        let no_identity = AuthConfig::new("key1", " ");
        assert!(matches!(no_identity.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CONFIG_PATH_ENV) };
        assert_eq!(
            AuthConfig::resolve_path(None),
            PathBuf::from("dropbox-auth.toml")
        );
        assert_eq!(
            AuthConfig::resolve_path(Some("/etc/app/auth.toml")),
            PathBuf::from("/etc/app/auth.toml")
        );
    }
}
