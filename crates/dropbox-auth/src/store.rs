//! Credential store over secure storage
//!
//! Credentials are keyed by account id inside a namespace derived from the
//! host application's identity, so the store holds at most one credential
//! per account. A tokio Mutex serializes writes so the add-vs-update
//! decision in [`CredentialStore::save`] cannot race another writer; reads
//! go straight to the backend.
//!
//! Everything the store hands out is an [`AttachedCredential`]: it carries a
//! handle back to this store, so refreshing it persists the new token.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::constants::storage_namespace;
use crate::credentials::Credential;
use crate::error::{Error, Result};
use crate::storage::SecureStorage;
use crate::token::TokenClient;

const EVENT_CAPACITY: usize = 32;

/// Change notifications for stored credentials.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// An authorization attempt completed and its credential was saved.
    Added(Credential),
    /// A refresh replaced the stored access token.
    Refreshed(Credential),
    /// A stored credential was deleted.
    Removed { account_id: String },
}

/// Whether [`CredentialStore::save`] inserted or replaced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Added,
    Updated,
}

/// Cheaply cloneable handle to a namespaced credential store.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn SecureStorage>,
    namespace: String,
    client: TokenClient,
    write_lock: Mutex<()>,
    refresh_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("namespace", &self.inner.namespace)
            .field("client_id", &self.inner.client.client_id())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Open the store for `app_identity` (e.g. a bundle identifier).
    ///
    /// `client` is used by attached credentials to refresh themselves.
    pub fn new(backend: Arc<dyn SecureStorage>, app_identity: &str, client: TokenClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                backend,
                namespace: storage_namespace(app_identity),
                client,
                write_lock: Mutex::new(()),
                refresh_locks: std::sync::Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn client_id(&self) -> &str {
        self.inner.client.client_id()
    }

    pub fn token_client(&self) -> &TokenClient {
        &self.inner.client
    }

    /// Subscribe to credential change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn notify(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Bind `credential` to this store without persisting it.
    pub fn attach(&self, credential: Credential) -> AttachedCredential {
        AttachedCredential {
            credential,
            store: self.clone(),
        }
    }

    /// Whether the namespace holds no credentials.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.account_ids().await?.is_empty())
    }

    /// Account ids with a stored credential, unordered.
    pub async fn account_ids(&self) -> Result<Vec<String>> {
        self.inner.backend.keys(&self.inner.namespace).await
    }

    /// Every stored credential, one per account, unordered.
    ///
    /// Entries deleted between listing and reading are skipped, as are
    /// entries that no longer decode.
    pub async fn all(&self) -> Result<Vec<AttachedCredential>> {
        let mut credentials = Vec::new();
        for account_id in self.account_ids().await? {
            match self.get(&account_id).await {
                Ok(credential) => credentials.push(credential),
                Err(Error::NotFound(_)) => continue,
                Err(Error::Decode(msg)) => {
                    warn!(account_id = %account_id, error = %msg, "skipping undecodable stored credential");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(credentials)
    }

    /// Any one stored credential.
    pub async fn first(&self) -> Result<Option<AttachedCredential>> {
        for account_id in self.account_ids().await? {
            match self.get(&account_id).await {
                Ok(credential) => return Ok(Some(credential)),
                Err(Error::NotFound(_) | Error::Decode(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Look up the credential for `account_id`.
    pub async fn get(&self, account_id: &str) -> Result<AttachedCredential> {
        let credential = self.load(account_id).await?;
        Ok(self.attach(credential))
    }

    async fn load(&self, account_id: &str) -> Result<Credential> {
        let record = self
            .inner
            .backend
            .get(&self.inner.namespace, account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {account_id} not in credential store")))?;
        Credential::from_record(&record)
    }

    /// Insert or replace the credential for its account.
    pub async fn save(&self, credential: &Credential) -> Result<SaveOutcome> {
        let record = credential.to_record()?;
        let _guard = self.inner.write_lock.lock().await;

        let exists = self
            .inner
            .backend
            .get(&self.inner.namespace, &credential.account_id)
            .await?
            .is_some();
        self.inner
            .backend
            .set(&self.inner.namespace, &credential.account_id, record)
            .await?;

        let outcome = if exists {
            SaveOutcome::Updated
        } else {
            SaveOutcome::Added
        };
        debug!(account_id = %credential.account_id, ?outcome, "saved credential");
        Ok(outcome)
    }

    /// Delete the credential for its account. Deleting an absent entry succeeds.
    pub async fn remove(&self, credential: &Credential) -> Result<()> {
        self.remove_account(&credential.account_id).await
    }

    /// Delete the credential stored for `account_id`, if any.
    pub async fn remove_account(&self, account_id: &str) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let removed = self
            .inner
            .backend
            .delete(&self.inner.namespace, account_id)
            .await?;
        self.forget_refresh_lock(account_id);
        if removed {
            debug!(account_id, "removed credential");
            self.notify(AuthEvent::Removed {
                account_id: account_id.to_string(),
            });
        }
        Ok(())
    }

    /// Delete every credential in the namespace.
    pub async fn remove_all(&self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let account_ids = self.inner.backend.keys(&self.inner.namespace).await?;
        self.inner.backend.delete_all(&self.inner.namespace).await?;
        self.refresh_locks().clear();
        info!(count = account_ids.len(), "removed all credentials");
        for account_id in account_ids {
            self.notify(AuthEvent::Removed { account_id });
        }
        Ok(())
    }

    /// Replace the stored credential only if its account is still present.
    async fn update_existing(&self, credential: &Credential) -> Result<bool> {
        let record = credential.to_record()?;
        let _guard = self.inner.write_lock.lock().await;

        let exists = self
            .inner
            .backend
            .get(&self.inner.namespace, &credential.account_id)
            .await?
            .is_some();
        if exists {
            self.inner
                .backend
                .set(&self.inner.namespace, &credential.account_id, record)
                .await?;
        }
        Ok(exists)
    }

    fn refresh_locks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.inner
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks()
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the refresh lock of a removed account. A refresh still holding
    /// it finishes normally and then finds the account gone.
    fn forget_refresh_lock(&self, account_id: &str) {
        self.refresh_locks().remove(account_id);
    }
}

/// A credential bound to the store it was loaded from or saved to.
#[derive(Clone)]
pub struct AttachedCredential {
    credential: Credential,
    store: CredentialStore,
}

impl std::fmt::Debug for AttachedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedCredential")
            .field("credential", &self.credential)
            .field("namespace", &self.store.namespace())
            .finish()
    }
}

impl Deref for AttachedCredential {
    type Target = Credential;

    fn deref(&self) -> &Credential {
        &self.credential
    }
}

impl AttachedCredential {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Drop the store binding.
    pub fn into_detached(self) -> Credential {
        self.credential
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// The app key this credential refreshes under.
    pub fn client_id(&self) -> &str {
        self.store.client_id()
    }

    /// Refresh and persist.
    ///
    /// Without `force`, a credential that has not expired is returned as-is
    /// with no network call. Concurrent refreshes of one account are
    /// serialized: a caller that waited on another's refresh re-reads the
    /// store and reuses the fresh token instead of exchanging again.
    ///
    /// On failure the stored credential is left untouched. If the account
    /// was removed while the refresh was running, the refreshed value is
    /// returned but not written back.
    pub async fn refresh(&self, force: bool) -> Result<AttachedCredential> {
        if !force && !self.credential.has_expired() {
            return Ok(self.clone());
        }

        let account_id = self.credential.account_id.as_str();
        let lock = self.store.refresh_lock(account_id);
        let _guard = lock.lock().await;

        let current = match self.store.load(account_id).await {
            Ok(stored) => Some(stored),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        if let Some(stored) = &current {
            if !force && !stored.has_expired() {
                debug!(account_id, "reusing token refreshed by a concurrent caller");
                return Ok(self.store.attach(stored.clone()));
            }
        }

        let base = current.as_ref().unwrap_or(&self.credential);
        let refreshed = self.store.token_client().refresh_token(base).await?;

        // The account may have been removed while the exchange was in flight.
        if current.is_some() && self.store.update_existing(&refreshed).await? {
            info!(account_id, "refreshed and persisted credential");
            self.store.notify(AuthEvent::Refreshed(refreshed.clone()));
        } else {
            warn!(account_id, "credential removed during refresh, not persisting");
        }

        Ok(self.store.attach(refreshed))
    }

    /// Sign `request`, refreshing first if the token has expired.
    pub async fn signed(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(reqwest::RequestBuilder, AttachedCredential)> {
        let fresh = self.refresh(false).await?;
        Ok((fresh.sign(request), fresh))
    }
}
