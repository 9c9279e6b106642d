use std::time::Duration;

use thiserror::Error;

/// No usable credential could be obtained.
#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("Failed to start login process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Login process exited without producing a login result")]
    NoResult,

    #[error("Login did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Malformed cookie pair: {0:?}")]
    MalformedCookies(String),

    #[error("Login failed: {0}")]
    Failed(String),
}

/// Failures reading or writing the encrypted login cache.
///
/// Never surfaced past `CredentialCache`; every variant is treated as a
/// cache miss on read and ignored on write.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Could not derive machine key: {0}")]
    MachineKey(String),

    #[error("Cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache file could not be decrypted")]
    Decrypt,

    #[error("Cache file could not be encrypted")]
    Encrypt,

    #[error("Cache file is malformed: {0}")]
    Malformed(String),
}
