// Token persistence for the API client: in memory or a JSON file

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::ClientError;

/// The two credentials a client session holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Tokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }
}

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Tokens>, ClientError>;

    fn save(&self, tokens: &Tokens) -> Result<(), ClientError>;

    fn clear(&self) -> Result<(), ClientError>;
}

// ============================================================================
// MEMORY
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<Tokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: Tokens) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Tokens>>, ClientError> {
        self.tokens
            .lock()
            .map_err(|_| ClientError::Store("token store lock poisoned".to_string()))
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Tokens>, ClientError> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, tokens: &Tokens) -> Result<(), ClientError> {
        *self.slot()? = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.slot()? = None;
        Ok(())
    }
}

// ============================================================================
// FILE
// ============================================================================

/// Tokens as a small JSON file, by default under the platform data dir
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// e.g. ~/.local/share/verifai/tokens.json on Linux
    pub fn default_location() -> Result<Self, ClientError> {
        let dirs = ProjectDirs::from("app", "VerifAI", "verifai")
            .ok_or_else(|| ClientError::Store("Could not determine platform-specific data dir".to_string()))?;
        Ok(Self::new(dirs.data_dir().join("tokens.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn store_err(action: &str, path: &Path, e: impl std::fmt::Display) -> ClientError {
    ClientError::Store(format!("Failed to {} {}: {}", action, path.display(), e))
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Tokens>, ClientError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err("read", &self.path, e)),
        };
        let tokens = serde_json::from_str(&raw).map_err(|e| store_err("parse", &self.path, e))?;
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &Tokens) -> Result<(), ClientError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| store_err("create", dir, e))?;
        }
        let json = serde_json::to_string_pretty(tokens)?;
        fs::write(&self.path, json).map_err(|e| store_err("write", &self.path, e))
    }

    fn clear(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err("remove", &self.path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().unwrap(), None);

        store.save(&Tokens::new("a", "r")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().access_token, "a");

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("tokens.json"));

        assert_eq!(store.load().unwrap(), None);
        store.save(&Tokens::new("access-1", "refresh-1")).unwrap();

        let reopened = FileTokenStore::new(store.path());
        assert_eq!(reopened.load().unwrap(), Some(Tokens::new("access-1", "refresh-1")));

        reopened.clear().unwrap();
        reopened.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_store_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not json").unwrap();
        let err = FileTokenStore::new(file.path()).load().unwrap_err();
        assert!(matches!(err, ClientError::Store(_)));
    }
}
