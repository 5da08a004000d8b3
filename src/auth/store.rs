//! Credential storage.
//!
//! Reads and writes are synchronous and never touch the network. The file
//! store keeps the credential across process restarts.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::auth::credential::Credential;

/// Holder of the single current access credential.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<Credential>;

    fn set(&self, credential: Option<Credential>);

    fn clear(&self) {
        self.set(None);
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    current: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            current: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn set(&self, credential: Option<Credential>) {
        if let Ok(mut guard) = self.current.write() {
            *guard = credential;
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read credential file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("credential file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
}

/// Durable store backed by a small JSON file.
///
/// The file is rewritten through a sibling temp file and a rename so a crash
/// mid-write leaves either the old or the new credential, never a torn one.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    current: RwLock<Option<Credential>>,
}

impl FileCredentialStore {
    /// Opens the store, loading a previously persisted credential if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let current = load_credential(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, credential: Option<&Credential>) -> io::Result<()> {
        let Some(credential) = credential else {
            return match fs::remove_file(&self.path) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            };
        };

        let document = StoredCredential {
            access_token: credential.expose().to_string(),
        };
        let encoded = serde_json::to_vec(&document)?;

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn set(&self, credential: Option<Credential>) {
        if let Err(err) = self.persist(credential.as_ref()) {
            warn!(
                event = "credential_store_write_failed",
                path = %self.path.display(),
                error = %err
            );
        }
        if let Ok(mut guard) = self.current.write() {
            *guard = credential;
        }
    }
}

fn load_credential(path: &Path) -> Result<Option<Credential>, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let stored: StoredCredential =
        serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    if stored.access_token.is_empty() {
        return Ok(None);
    }
    Ok(Some(Credential::new(stored.access_token)))
}

#[cfg(test)]
mod tests {
    use super::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError};
    use crate::auth::credential::Credential;

    #[test]
    fn memory_store_set_get_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().is_none());

        store.set(Some(Credential::new("first")));
        assert_eq!(store.get(), Some(Credential::new("first")));

        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("credential.json");

        let store = FileCredentialStore::open(&path).expect("open empty store");
        assert!(store.get().is_none());
        store.set(Some(Credential::new("persisted-token")));

        let reopened = FileCredentialStore::open(&path).expect("reopen store");
        assert_eq!(reopened.get(), Some(Credential::new("persisted-token")));
    }

    #[test]
    fn file_store_clear_removes_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("credential.json");

        let store = FileCredentialStore::open(&path).expect("open store");
        store.set(Some(Credential::new("token")));
        assert!(path.exists());

        store.clear();
        assert!(!path.exists());
        assert!(store.get().is_none());

        let reopened = FileCredentialStore::open(&path).expect("reopen store");
        assert!(reopened.get().is_none());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("credential.json");
        std::fs::write(&path, b"{not json").expect("write corrupt file");

        match FileCredentialStore::open(&path) {
            Err(StoreError::Corrupt { .. }) => {}
            other => panic!("expected corrupt-store error, got {other:?}"),
        }
    }
}
