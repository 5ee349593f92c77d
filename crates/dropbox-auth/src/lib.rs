//! Dropbox OAuth2 client library
//!
//! Authorization Code + PKCE flow, token exchange and refresh, and
//! credential persistence in a pluggable secure storage backend.
//!
//! Credential flow:
//! 1. `AuthManager::authorize()` (or `begin_authorization()`) generates a
//!    PKCE pair and builds the authorization URL
//! 2. A `PresentationSurface` opens it and returns the redirect callback
//! 3. The `code` in the callback is exchanged at the token endpoint
//! 4. The credential is saved to the `CredentialStore` and an
//!    `AuthEvent::Added` is broadcast
//! 5. `AttachedCredential::signed()` refreshes on demand before signing;
//!    `refresh::spawn_refresh_task()` refreshes ahead of expiry

pub mod authorize;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod multipart;
pub mod pkce;
pub mod presentation;
pub mod refresh;
pub mod storage;
pub mod store;
pub mod token;
pub mod transport;

pub use authorize::{build_authorization_url, parse_callback};
pub use config::AuthConfig;
pub use constants::*;
pub use credentials::Credential;
pub use error::{Error, OAuthErrorCode, Result};
pub use manager::{AuthManager, AuthState};
pub use pkce::{PkcePair, compute_challenge, generate_verifier};
pub use presentation::{CallbackSender, ChannelSurface, PresentationSurface, UrlOpener};
pub use refresh::spawn_refresh_task;
pub use storage::{FileStorage, MemoryStorage, SecureStorage};
pub use store::{AttachedCredential, AuthEvent, CredentialStore, SaveOutcome};
pub use token::TokenClient;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
