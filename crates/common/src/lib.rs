//! Shared building blocks for the Dropbox auth workspace
//!
//! Holds the pieces that are not specific to the OAuth protocol: a
//! redacting wrapper for sensitive values and TOML configuration loading.

mod config;
mod error;
mod secret;

pub use config::{load_toml, resolve_config_path};
pub use error::{Error, Result};
pub use secret::Secret;
