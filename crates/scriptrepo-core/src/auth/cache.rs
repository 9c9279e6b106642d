use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::login::LoginProvider;
use super::store::{LoginStore, SavedLogin};
use super::{AuthenticationError, Credential};

/// How long to wait for the user to finish the login prompt.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Hands out the session credential, logging in only when it has to.
///
/// One instance per process. Share it behind an `Arc`; the internal lock
/// makes concurrent callers wait for a single login instead of each opening
/// their own prompt.
pub struct CredentialCache {
    session: Mutex<Option<Credential>>,
    store: Arc<LoginStore>,
    provider: Arc<dyn LoginProvider>,
    login_timeout: Duration,
}

impl CredentialCache {
    pub fn new(store: LoginStore, provider: Arc<dyn LoginProvider>) -> Self {
        Self {
            session: Mutex::new(None),
            store: Arc::new(store),
            provider,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Return the session credential, logging in first if none is held.
    ///
    /// Tries the encrypted cache file first and falls back to the interactive
    /// login. Cache problems are never returned; only a failed login is.
    /// The returned value is taken under the lock, so a concurrent `reset`
    /// cannot leave the caller with an empty credential.
    pub async fn ensure_logged_in(&self) -> Result<Credential, AuthenticationError> {
        let mut session = self.session.lock().await;
        if let Some(ref credential) = *session {
            return Ok(credential.clone());
        }

        if let Some(credential) = self.load_saved().await {
            info!(cookies = credential.len(), "Using saved login");
            *session = Some(credential.clone());
            return Ok(credential);
        }

        let outcome = tokio::time::timeout(self.login_timeout, self.provider.login())
            .await
            .map_err(|_| AuthenticationError::Timeout(self.login_timeout))??;

        let credential: Credential = outcome.cookies.parse()?;
        if credential.is_empty() {
            return Err(AuthenticationError::Failed(
                "login returned no cookies".to_string(),
            ));
        }
        info!(cookies = credential.len(), remember = outcome.remember, "Logged in");

        if outcome.remember {
            let saved = SavedLogin::new(credential.to_string(), true);
            let store = self.store.clone();
            match tokio::task::spawn_blocking(move || store.save(&saved)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, path = %self.store.path().display(), "Failed to save login")
                }
                Err(e) => warn!(error = %e, "Login save task failed"),
            }
        }

        *session = Some(credential.clone());
        Ok(credential)
    }

    /// Current in-memory credential; empty before the first login.
    pub async fn credential(&self) -> Credential {
        self.session.lock().await.clone().unwrap_or_default()
    }

    /// Forget the session and delete the saved login.
    pub async fn reset(&self) {
        let mut session = self.session.lock().await;
        *session = None;
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.clear()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, path = %self.store.path().display(), "Failed to delete saved login")
            }
            Err(e) => warn!(error = %e, "Login delete task failed"),
        }
        debug!("Login state reset");
    }

    async fn load_saved(&self) -> Option<Credential> {
        let store = self.store.clone();
        let saved = match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(Some(saved))) => saved,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                debug!(error = %e, "Could not read saved login");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Login load task failed");
                return None;
            }
        };

        if !saved.remember {
            debug!("Saved login was not marked to remember");
            return None;
        }
        match saved.cookies.parse::<Credential>() {
            Ok(credential) if !credential.is_empty() => Some(credential),
            Ok(_) => {
                debug!("Saved login has no cookies");
                None
            }
            Err(e) => {
                debug!(error = %e, "Saved login is malformed");
                None
            }
        }
    }
}
