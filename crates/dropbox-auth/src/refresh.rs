//! Proactive background token refresh
//!
//! Spawns a periodic task that walks every stored credential and refreshes
//! the ones approaching expiry, so request-time refreshes are rare.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::store::CredentialStore;

/// Spawn a background task that proactively refreshes expiring tokens.
///
/// Runs every `interval` and force-refreshes any credential with less than
/// `threshold` of validity left. Failures are logged and left for the next
/// cycle. Abort the returned handle to stop the task.
pub fn spawn_refresh_task(
    store: CredentialStore,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&store, threshold).await;
        }
    })
}

/// Run one refresh cycle. Returns how many credentials were refreshed.
pub async fn refresh_cycle(store: &CredentialStore, threshold: Duration) -> usize {
    let credentials = match store.all().await {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(error = %e, "failed to list credentials for background refresh");
            return 0;
        }
    };

    let mut refreshed = 0;
    for credential in credentials {
        if !credential.expires_within(threshold) {
            continue;
        }

        debug!(
            account_id = %credential.account_id,
            "token expiring within threshold, refreshing"
        );

        match credential.refresh(true).await {
            Ok(_) => {
                refreshed += 1;
                info!(account_id = %credential.account_id, "background token refresh succeeded");
            }
            Err(e) if e.is_retryable() => {
                warn!(account_id = %credential.account_id, error = %e, "background refresh failed (transient), will retry next cycle");
            }
            Err(e) => {
                warn!(account_id = %credential.account_id, error = %e, "background refresh rejected");
            }
        }
    }
    refreshed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, now_millis};
    use crate::error::Result;
    use crate::storage::MemoryStorage;
    use crate::token::TokenClient;
    use crate::transport::{HttpRequest, HttpResponse, Transport};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        calls: AtomicUsize,
        status: u16,
    }

    impl CountingTransport {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = if self.status == 200 {
                r#"{"access_token":"at_background","expires_in":14400}"#
            } else {
                r#"{"error":"server_error"}"#
            };
            Ok(HttpResponse {
                status: self.status,
                body: body.as_bytes().to_vec(),
            })
        }
    }

    async fn test_store(transport: Arc<CountingTransport>, accounts: &[(&str, u64)]) -> CredentialStore {
        let client = TokenClient::new("key1", "https://api.dropbox.com/oauth2/token", transport);
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()), "com.example.notes", client);
        for (id, expires_in_millis) in accounts {
            store
                .save(&Credential {
                    access_token: format!("at_{id}"),
                    refresh_token: format!("rt_{id}"),
                    expires_at: now_millis() + expires_in_millis,
                    scope: None,
                    account_id: id.to_string(),
                    team_id: None,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn refresh_cycle_skips_valid_tokens() {
        let transport = CountingTransport::new(200);
        // Four hours left, threshold is fifteen minutes
        let store = test_store(transport.clone(), &[("a", 4 * 3_600_000)]).await;

        let refreshed = refresh_cycle(&store, Duration::from_secs(900)).await;

        assert_eq!(refreshed, 0);
        assert_eq!(transport.calls(), 0);
        assert_eq!(store.get("a").await.unwrap().access_token, "at_a");
    }

    #[tokio::test]
    async fn refresh_cycle_refreshes_expiring_tokens() {
        let transport = CountingTransport::new(200);
        // "b" has not expired yet but is inside the threshold
        let store = test_store(transport.clone(), &[("a", 4 * 3_600_000), ("b", 600_000)]).await;

        let refreshed = refresh_cycle(&store, Duration::from_secs(900)).await;

        assert_eq!(refreshed, 1);
        assert_eq!(transport.calls(), 1);
        assert_eq!(store.get("a").await.unwrap().access_token, "at_a");
        assert_eq!(store.get("b").await.unwrap().access_token, "at_background");
    }

    #[tokio::test]
    async fn refresh_cycle_keeps_credential_on_failure() {
        let transport = CountingTransport::new(500);
        let store = test_store(transport.clone(), &[("a", 1_000)]).await;

        let refreshed = refresh_cycle(&store, Duration::from_secs(900)).await;

        assert_eq!(refreshed, 0);
        assert_eq!(transport.calls(), 1);
        assert_eq!(store.get("a").await.unwrap().access_token, "at_a");
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_skips_first_tick() {
        let transport = CountingTransport::new(200);
        let store = test_store(transport.clone(), &[("a", 1_000)]).await;

        let handle = spawn_refresh_task(store.clone(), Duration::from_secs(60), Duration::from_secs(900));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.calls(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(transport.calls(), 1);
        assert_eq!(store.get("a").await.unwrap().access_token, "at_background");

        handle.abort();
    }
}
