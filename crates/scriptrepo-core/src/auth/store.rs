use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::machine::MachineKey;
use super::CacheError;

/// Directory under the application data directory holding the login file
pub const SETTINGS_DIR: &str = "settings";

/// Login cache file name
pub const LOGIN_FILE: &str = "repo.dat";

/// ChaCha20-Poly1305 nonce length; the nonce prefixes the ciphertext on disk.
const NONCE_LEN: usize = 12;

/// Produces the cache key. Called at most once per store.
pub type KeySource = Arc<dyn Fn() -> Result<MachineKey, CacheError> + Send + Sync>;

/// Location of the login file under an application data directory.
pub fn login_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(SETTINGS_DIR).join(LOGIN_FILE)
}

/// What gets encrypted into the login cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedLogin {
    pub cookies: String,
    /// Only a remembered login may be picked up by a later process.
    pub remember: bool,
    pub saved_at: DateTime<Utc>,
}

impl SavedLogin {
    pub fn new(cookies: impl Into<String>, remember: bool) -> Self {
        Self {
            cookies: cookies.into(),
            remember,
            saved_at: Utc::now(),
        }
    }
}

/// Encrypted on-disk copy of the last remembered login.
///
/// File access is blocking; async callers should go through
/// `tokio::task::spawn_blocking`.
pub struct LoginStore {
    path: PathBuf,
    source: KeySource,
    // Failures are kept as text so a missing identifier is only looked up once
    key: OnceLock<Result<MachineKey, String>>,
}

impl LoginStore {
    /// Store keyed to this machine. The key is derived on first use; a
    /// machine without a usable identifier simply never hits the cache.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_key_source(dir, Arc::new(MachineKey::for_this_machine))
    }

    /// Store using an explicit key instead of the machine identity.
    pub fn with_key(dir: impl AsRef<Path>, key: MachineKey) -> Self {
        let store = Self::with_key_source(dir, Arc::new(|| {
            Err(CacheError::MachineKey("key already provided".to_string()))
        }));
        let _ = store.key.set(Ok(key));
        store
    }

    /// Store deriving its key lazily from `source`.
    pub fn with_key_source(dir: impl AsRef<Path>, source: KeySource) -> Self {
        Self {
            path: login_path(dir),
            source,
            key: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load and decrypt the saved login. `Ok(None)` when no file exists.
    pub fn load(&self) -> Result<Option<SavedLogin>, CacheError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        let plaintext = decrypt(&self.key()?, &bytes)?;
        let saved: SavedLogin = serde_json::from_slice(&plaintext)
            .map_err(|e| CacheError::Malformed(e.to_string()))?;
        Ok(Some(saved))
    }

    /// Encrypt and write the login, creating the data directory if needed.
    pub fn save(&self, saved: &SavedLogin) -> Result<(), CacheError> {
        let plaintext =
            serde_json::to_vec(saved).map_err(|e| CacheError::Malformed(e.to_string()))?;
        let bytes = encrypt(&self.key()?, &plaintext)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Delete the cache file if present.
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn key(&self) -> Result<MachineKey, CacheError> {
        let key = self.key.get_or_init(|| {
            debug!("Deriving login cache key");
            (self.source)().map_err(|e| e.to_string())
        });
        key.clone().map_err(CacheError::MachineKey)
    }
}

fn encrypt(key: &MachineKey, plaintext: &[u8]) -> Result<Vec<u8>, CacheError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CacheError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(key: &MachineKey, bytes: &[u8]) -> Result<Vec<u8>, CacheError> {
    if bytes.len() <= NONCE_LEN {
        return Err(CacheError::Malformed(format!(
            "file too short ({} bytes)",
            bytes.len()
        )));
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CacheError::Decrypt)
}
