//! Presentation surface seam
//!
//! Something has to show the authorization page to the user and hand back
//! the URL the provider redirects to: an in-app web view, the system
//! browser plus a deep-link handler, a local callback server. The
//! orchestrator only needs [`PresentationSurface`].

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

/// Shows the authorization page and waits for the redirect back.
///
/// Implementations resolve with the full callback URL, or with
/// [`Error::Cancelled`] when the user dismisses the surface. Dropping the
/// returned future must tear the surface down.
#[async_trait]
pub trait PresentationSurface: Send + Sync {
    async fn present(&self, authorization_url: &Url, callback_scheme: &str) -> Result<String>;
}

/// Opens the authorization URL, e.g. in the system browser. Returns whether
/// the URL was handled.
pub type UrlOpener = Box<dyn Fn(&Url) -> bool + Send + Sync>;

/// A surface that hands the URL to an opener and waits for the host
/// application to deliver the redirect through a [`CallbackSender`].
pub struct ChannelSurface {
    opener: UrlOpener,
    callbacks: Mutex<mpsc::Receiver<String>>,
}

/// Delivers redirect URLs to a waiting [`ChannelSurface`].
#[derive(Debug, Clone)]
pub struct CallbackSender {
    tx: mpsc::Sender<String>,
}

impl CallbackSender {
    /// Deliver a redirect URL. Returns false if the surface is gone.
    pub async fn deliver(&self, callback_url: impl Into<String>) -> bool {
        self.tx.send(callback_url.into()).await.is_ok()
    }
}

impl ChannelSurface {
    pub fn new(opener: UrlOpener) -> (Self, CallbackSender) {
        let (tx, rx) = mpsc::channel(4);
        (
            Self {
                opener,
                callbacks: Mutex::new(rx),
            },
            CallbackSender { tx },
        )
    }
}

#[async_trait]
impl PresentationSurface for ChannelSurface {
    async fn present(&self, authorization_url: &Url, callback_scheme: &str) -> Result<String> {
        let mut callbacks = self.callbacks.lock().await;
        // Redirects left over from an abandoned attempt.
        while callbacks.try_recv().is_ok() {}

        if !(self.opener)(authorization_url) {
            return Err(Error::Cancelled);
        }
        debug!("authorization URL opened, waiting for callback");

        loop {
            let Some(callback) = callbacks.recv().await else {
                return Err(Error::Cancelled);
            };
            match Url::parse(&callback) {
                Ok(url) if url.scheme() == callback_scheme => return Ok(callback),
                _ => warn!(expected = callback_scheme, "ignoring callback for another scheme"),
            }
        }
    }
}
