//! Secure key-value storage backends
//!
//! The credential store only depends on [`SecureStorage`]: namespaced
//! get/set/delete/list of opaque byte payloads. Hosts plug in their
//! platform keychain here. Two adapters ship with the crate:
//!
//! - [`MemoryStorage`]: process-local map, for tests and ephemeral hosts.
//! - [`FileStorage`]: a JSON file written atomically (temp file + rename)
//!   with 0600 permissions, for headless hosts without a keychain.
//!
//! Every operation is atomic per entry. There are no cross-entry
//! transactions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Namespaced secure storage capability.
#[async_trait]
pub trait SecureStorage: Send + Sync {
    /// Fetch the payload for `key`, `None` if absent.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace the payload for `key`.
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete `key`. Returns whether an entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// List every key in the namespace, in no particular order.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// Delete every entry in the namespace.
    async fn delete_all(&self, namespace: &str) -> Result<()> {
        for key in self.keys(namespace).await? {
            self.delete(namespace, &key).await?;
        }
        Ok(())
    }
}

/// In-memory [`SecureStorage`]. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStorage for MemoryStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some()))
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_all(&self, namespace: &str) -> Result<()> {
        self.entries.write().await.remove(namespace);
        Ok(())
    }
}

/// On-disk layout: namespace → key → base64 payload.
type FileState = BTreeMap<String, BTreeMap<String, String>>;

/// File-backed [`SecureStorage`].
///
/// The Mutex serializes all writes; every mutation rewrites the whole file
/// atomically. The file holds tokens in the clear (base64 is encoding, not
/// encryption), so it is created owner-only.
pub struct FileStorage {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileStorage {
    /// Load entries from `path`.
    ///
    /// If the file doesn't exist, creates it as `{}`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("checking storage file", &e))?;
        let state = if exists {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_error("reading storage file", &e))?;
            let state: FileState = serde_json::from_str(&contents).map_err(|e| Error::Backend {
                status: -1,
                message: format!("parsing storage file: {e}"),
            })?;
            info!(path = %path.display(), namespaces = state.len(), "loaded secure storage file");
            state
        } else {
            info!(path = %path.display(), "storage file not found, starting empty");
            let state = FileState::new();
            write_atomic(&path, &state).await?;
            state
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SecureStorage for FileStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().await;
        let Some(encoded) = state.get(namespace).and_then(|ns| ns.get(key)) else {
            return Ok(None);
        };
        STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| Error::Backend {
                status: -1,
                message: format!("corrupt entry {key}: {e}"),
            })
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), STANDARD.encode(value));
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.get(namespace).is_some_and(|ns| ns.contains_key(key)) {
            return Ok(false);
        }
        let mut next = state.clone();
        if let Some(ns) = next.get_mut(namespace) {
            ns.remove(key);
            if ns.is_empty() {
                next.remove(namespace);
            }
        }
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(true)
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_all(&self, namespace: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.contains_key(namespace) {
            return Ok(());
        }
        let mut next = state.clone();
        next.remove(namespace);
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

fn io_error(context: &str, err: &std::io::Error) -> Error {
    Error::Backend {
        status: err.raw_os_error().unwrap_or(-1),
        message: format!("{context}: {err}"),
    }
}

/// Write the storage state to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only).
async fn write_atomic(path: &Path, state: &FileState) -> Result<()> {
    let json = serde_json::to_string_pretty(state).map_err(|e| Error::Backend {
        status: -1,
        message: format!("serializing storage file: {e}"),
    })?;

    let dir = path.parent().ok_or_else(|| Error::Backend {
        status: -1,
        message: "storage path has no parent directory".into(),
    })?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dropbox-auth".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| io_error("writing temp storage file", &e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| io_error("setting storage file permissions", &e))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| io_error("renaming temp storage file", &e))?;

    debug!(path = %path.display(), "persisted secure storage");
    Ok(())
}
