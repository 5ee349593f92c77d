//! Authorization orchestrator
//!
//! Drives one authorization attempt at a time through
//! `Idle -> AwaitingCallback -> Exchanging -> {Authenticated, Failed}`:
//!
//! 1. A fresh PKCE pair is generated and the authorization URL built.
//! 2. The presentation surface (or the host app, in the two-step flow)
//!    returns a callback URL.
//! 3. A `code` in the callback is exchanged for a credential, which is
//!    saved to the store before the caller sees it.
//!
//! Starting a new attempt supersedes the one in flight: its PKCE pair is
//! discarded and its caller receives [`Error::Cancelled`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::authorize::{build_authorization_url, parse_callback};
use crate::config::AuthConfig;
use crate::credentials::Credential;
use crate::error::{Error, Result};
use crate::pkce::PkcePair;
use crate::presentation::PresentationSurface;
use crate::storage::SecureStorage;
use crate::store::{AttachedCredential, AuthEvent, CredentialStore};
use crate::token::TokenClient;
use crate::transport::{ReqwestTransport, Transport};

/// Where the orchestrator is in its current (or most recent) attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Failed,
}

struct Attempt {
    id: u64,
    pkce: PkcePair,
    cancel: Option<oneshot::Sender<()>>,
}

struct Slot {
    state: AuthState,
    current: Option<Attempt>,
}

/// Runs authorization attempts and hands out stored credentials.
pub struct AuthManager {
    config: AuthConfig,
    store: CredentialStore,
    slot: Mutex<Slot>,
    next_attempt: AtomicU64,
}

impl AuthManager {
    /// Build a manager that talks to the token endpoint over `reqwest`.
    pub fn new(config: AuthConfig, backend: Arc<dyn SecureStorage>) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Self::with_transport(config, backend, Arc::new(transport))
    }

    /// Build a manager over a caller-supplied transport.
    pub fn with_transport(
        config: AuthConfig,
        backend: Arc<dyn SecureStorage>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let client = TokenClient::new(&config.app_key, &config.token_endpoint, transport);
        let store = CredentialStore::new(backend, &config.app_identity, client);
        info!(namespace = store.namespace(), "auth manager ready");
        Ok(Self {
            config,
            store,
            slot: Mutex::new(Slot {
                state: AuthState::Idle,
                current: None,
            }),
            next_attempt: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn state(&self) -> AuthState {
        self.slot().state
    }

    /// Subscribe to added/refreshed/removed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.store.subscribe()
    }

    // --- Authorization ---

    /// Start an attempt and return the URL for the host to open.
    ///
    /// Complete it with [`handle_callback`](Self::handle_callback). Any
    /// attempt already in flight is cancelled.
    pub fn begin_authorization(&self) -> Result<Url> {
        let (_, url, _) = self.start_attempt()?;
        Ok(url)
    }

    /// Complete the pending attempt with the provider's redirect URL.
    pub async fn handle_callback(&self, callback_url: &str) -> Result<AttachedCredential> {
        let id = {
            let slot = self.slot();
            match &slot.current {
                Some(attempt) if slot.state == AuthState::AwaitingCallback => attempt.id,
                _ => return Err(Error::NotAwaitingCallback),
            }
        };
        self.complete_attempt(id, callback_url).await
    }

    /// Run a whole attempt through `surface`.
    ///
    /// Resolves exactly once: with the saved credential, with the first
    /// error, or with [`Error::Cancelled`] if a newer attempt supersedes
    /// this one before its code is exchanged. On cancellation the surface's
    /// future is dropped.
    pub async fn authorize(&self, surface: &dyn PresentationSurface) -> Result<AttachedCredential> {
        let callback_scheme = self.config.callback_scheme()?;
        let (id, url, mut cancelled) = self.start_attempt()?;

        let flow = async {
            let callback = match surface.present(&url, &callback_scheme).await {
                Ok(callback) => callback,
                Err(e) => return Err(self.fail_attempt(id, e)),
            };
            self.complete_attempt(id, &callback).await
        };

        tokio::select! {
            biased;
            Ok(()) = &mut cancelled => {
                debug!(attempt = id, "authorization attempt superseded");
                Err(Error::Cancelled)
            }
            result = flow => result,
        }
    }

    fn start_attempt(&self) -> Result<(u64, Url, oneshot::Receiver<()>)> {
        let pkce = PkcePair::generate();
        let url = build_authorization_url(
            &self.config.authorize_endpoint,
            &self.config.app_key,
            &self.config.redirect_uri(),
            pkce.challenge(),
        )?;
        let id = self.next_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let mut slot = self.slot();
        if let Some(previous) = slot.current.take() {
            info!(attempt = previous.id, "cancelling superseded authorization attempt");
            if let Some(cancel) = previous.cancel {
                let _ = cancel.send(());
            }
        }
        slot.current = Some(Attempt {
            id,
            pkce,
            cancel: Some(cancel_tx),
        });
        slot.state = AuthState::AwaitingCallback;
        debug!(attempt = id, "authorization attempt started");

        Ok((id, url, cancel_rx))
    }

    async fn complete_attempt(&self, id: u64, callback_url: &str) -> Result<AttachedCredential> {
        let code = match parse_callback(callback_url) {
            Ok(code) => code,
            Err(e) => return Err(self.fail_attempt(id, e)),
        };

        let verifier = {
            let mut slot = self.slot();
            let verifier = match &slot.current {
                Some(attempt) if attempt.id == id && slot.state == AuthState::AwaitingCallback => {
                    attempt.pkce.verifier().clone()
                }
                _ => return Err(Error::Cancelled),
            };
            slot.state = AuthState::Exchanging;
            verifier
        };

        let exchanged = self
            .store
            .token_client()
            .exchange_code(&code, verifier.expose_str(), &self.config.redirect_uri())
            .await;
        drop(verifier);

        let credential = match exchanged {
            Ok(credential) => credential,
            Err(e) => return Err(self.fail_attempt(id, e)),
        };

        // Commit before saving: from here on a newer attempt no longer
        // cancels this one.
        if !self.finish_attempt(id, AuthState::Authenticated) {
            return Err(Error::Cancelled);
        }
        if let Err(e) = self.store.save(&credential).await {
            let mut slot = self.slot();
            if slot.current.is_none() && slot.state == AuthState::Authenticated {
                slot.state = AuthState::Failed;
            }
            warn!(attempt = id, error = %e, "saving authorized credential failed");
            return Err(e);
        }

        info!(attempt = id, account_id = %credential.account_id, "authorization complete");
        self.store.notify(AuthEvent::Added(credential.clone()));
        Ok(self.store.attach(credential))
    }

    /// Mark attempt `id` failed and pass `err` through, or report
    /// cancellation if a newer attempt already replaced it.
    fn fail_attempt(&self, id: u64, err: Error) -> Error {
        if !self.finish_attempt(id, AuthState::Failed) {
            return Error::Cancelled;
        }
        warn!(attempt = id, error = %err, "authorization attempt failed");
        err
    }

    /// Clear attempt `id` (dropping its PKCE pair) if it is still current.
    fn finish_attempt(&self, id: u64, state: AuthState) -> bool {
        let mut slot = self.slot();
        match &slot.current {
            Some(attempt) if attempt.id == id => {
                slot.current = None;
                slot.state = state;
                true
            }
            _ => false,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Stored credentials ---

    pub async fn has_credentials(&self) -> Result<bool> {
        Ok(!self.store.is_empty().await?)
    }

    pub async fn credentials(&self) -> Result<Vec<AttachedCredential>> {
        self.store.all().await
    }

    pub async fn first_credential(&self) -> Result<Option<AttachedCredential>> {
        self.store.first().await
    }

    pub async fn credential(&self, account_id: &str) -> Result<AttachedCredential> {
        self.store.get(account_id).await
    }

    pub async fn remove(&self, credential: &Credential) -> Result<()> {
        self.store.remove(credential).await
    }

    pub async fn remove_all(&self) -> Result<()> {
        self.store.remove_all().await
    }

    /// Attach `credential` to this manager's store, then refresh it.
    pub async fn refresh(&self, credential: Credential, force: bool) -> Result<AttachedCredential> {
        self.store.attach(credential).refresh(force).await
    }

    /// Sign `request` for `account_id`, refreshing the token first if needed.
    pub async fn signed_request(
        &self,
        account_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        let credential = self.store.get(account_id).await?;
        let (request, _) = credential.signed(request).await?;
        Ok(request)
    }
}
