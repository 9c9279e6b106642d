//! Client for the script repository's scripter panel.
//!
//! The repository is a browser-facing site rather than a real API. Requests
//! carry the login cookies plus a set of browser headers, since the site
//! rejects clients that don't look like a browser.
//!
//! The site answers a stale session with 404, not 401/403. Any 404 therefore
//! drops the current login so the next request logs in again. This is a
//! quirk of this service and only 404 is treated this way.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Request, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::auth::{CommandLogin, Credential, CredentialCache, LoginStore};
use crate::config::{data_dir, Config};
use crate::models::{RepoScript, ScriptListing};

use super::RepositoryError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Uploads are small zip archives, so 30s is plenty.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Attempts per logical operation: the first try plus one retry.
const MAX_ATTEMPTS: u32 = 2;

const LISTING_PATH: &str = "/data/scripter_panel/published_scripts";

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/55.0.2883.28 Safari/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.8";

/// Repository client. Clone is cheap: the connection pool and the login
/// cache are shared.
#[derive(Clone)]
pub struct RepositoryClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialCache>,
}

impl RepositoryClient {
    /// Create a client for `base_url` using the given login cache.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<CredentialCache>,
    ) -> Result<Self, RepositoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Wire up a client from configuration: the login prompt command, the
    /// saved login in the application data directory, and the repository URL.
    pub fn from_config(config: &Config) -> Result<Self, RepositoryError> {
        let mut login =
            CommandLogin::new(config.login_command()).args(config.login_args.iter().cloned());
        if let Some(ref dir) = config.login_working_dir {
            login = login.working_dir(dir);
        }
        let store = LoginStore::new(data_dir());
        let credentials = CredentialCache::new(store, Arc::new(login))
            .with_login_timeout(config.login_timeout());
        Self::new(config.repository_url(), Arc::new(credentials))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forget the current login, including the saved copy.
    pub async fn reset_login(&self) {
        self.credentials.reset().await;
    }

    // ===== Repository Operations =====

    /// Fetch the scripts the logged-in scripter has published.
    pub async fn list_scripts(&self) -> Result<Vec<RepoScript>, RepositoryError> {
        let scripts = retry("list scripts", || self.fetch_scripts()).await?;
        info!(count = scripts.len(), "Fetched published scripts");
        Ok(scripts)
    }

    /// Upload a new archive for script `id` under `version`.
    pub async fn update_script(
        &self,
        id: &str,
        version: &str,
        archive: &Path,
    ) -> Result<(), RepositoryError> {
        let bytes = tokio::fs::read(archive)
            .await
            .map_err(|source| RepositoryError::Archive {
                path: archive.to_path_buf(),
                source,
            })?;
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.zip", id));

        debug!(
            id = id,
            version = version,
            path = %archive.display(),
            size = bytes.len(),
            "Updating script"
        );
        retry("update script", || {
            self.upload_archive(id, version, &file_name, bytes.clone())
        })
        .await?;
        info!(id = id, version = version, "Script updated");
        Ok(())
    }

    async fn fetch_scripts(&self) -> Result<Vec<RepoScript>, RepositoryError> {
        // The timestamp keeps intermediate caches from serving a stale list
        let url = format!(
            "{}{}?_={}",
            self.base_url,
            LISTING_PATH,
            Utc::now().timestamp_millis()
        );
        let request = self.client.get(&url).build()?;
        let response = self.send(request).await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RepositoryError::from_status(status, &body));
        }
        if body.trim().is_empty() {
            return Err(RepositoryError::EmptyBody(url));
        }
        debug!(body = %body, "Script listing response");

        let listing: ScriptListing = serde_json::from_str(&body)
            .map_err(|e| RepositoryError::InvalidResponse(format!("script listing: {}", e)))?;
        Ok(listing.scripts)
    }

    async fn upload_archive(
        &self,
        id: &str,
        version: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RepositoryError> {
        let url = format!("{}/script/edit/{}/source/", self.base_url, id);
        let file = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(ARCHIVE_CONTENT_TYPE)?;
        let form = Form::new()
            .text("version", version.to_string())
            .part("file", file);

        let request = self.client.post(&url).multipart(form).build()?;
        let response = self.send(request).await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(RepositoryError::from_status(status, &body));
        }
        Ok(())
    }

    /// Log in if needed, decorate, send, and watch for the stale-session 404.
    async fn send(&self, request: Request) -> Result<Response, RepositoryError> {
        let credential = self.credentials.ensure_logged_in().await?;
        let request = decorate(request, &credential)?;

        debug!(
            method = %request.method(),
            url = %request.url(),
            headers = ?request.headers().keys().collect::<Vec<_>>(),
            "Sending request"
        );
        let url = request.url().clone();
        let response = self.client.execute(request).await?;
        debug!(status = %response.status(), headers = ?response.headers(), "Received response");

        if response.status() == StatusCode::NOT_FOUND {
            warn!(url = %url, "Received 404 from repository, resetting login");
            self.credentials.reset().await;
        }
        Ok(response)
    }
}

/// Return `request` with the session cookies and browser headers attached.
/// `Origin` is the scheme, host and port of the request URL.
pub fn decorate(mut request: Request, credential: &Credential) -> Result<Request, RepositoryError> {
    let mut headers = HeaderMap::new();
    for cookie in credential.cookies() {
        let value = HeaderValue::from_str(&cookie.header_value())
            .map_err(|_| RepositoryError::InvalidCookie(cookie.name.clone()))?;
        headers.append(header::COOKIE, value);
    }

    headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Keep-Alive"));
    let origin = request.url().origin().ascii_serialization();
    if let Ok(origin) = HeaderValue::from_str(&origin) {
        headers.insert(header::ORIGIN, origin);
    }
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(header::ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    if request.method() == Method::POST {
        if let Ok(referer) = HeaderValue::from_str(request.url().as_str()) {
            headers.insert(header::REFERER, referer);
        }
    }

    // Keep anything the request already set (multipart content type)
    for (name, value) in request.headers().iter() {
        if !headers.contains_key(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    *request.headers_mut() = headers;
    Ok(request)
}

/// Run `attempt` up to `MAX_ATTEMPTS` times, stopping early on success or
/// on an error that a retry cannot fix. No backoff.
pub async fn retry<T, F, Fut>(operation: &str, mut attempt: F) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempts < MAX_ATTEMPTS => {
                debug!(operation = operation, attempt = attempts, error = %e, "Attempt failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mockito::{Matcher, Server};

    use super::*;
    use crate::auth::cache::tests::FakeLogin;
    use crate::auth::store::login_path;
    use crate::auth::{AuthenticationError, MachineKey};

    fn client_for(url: &str, dir: &Path, login: Arc<FakeLogin>) -> RepositoryClient {
        let store = LoginStore::with_key(dir, MachineKey::derive("test-machine").unwrap());
        let credentials = Arc::new(CredentialCache::new(store, login));
        RepositoryClient::new(url, credentials).unwrap()
    }

    fn write_archive(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("MyScript.zip");
        std::fs::write(&path, b"PK\x03\x04fake-archive-bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn test_list_scripts() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", LISTING_PATH)
            .match_query(Matcher::Regex(r"^_=\d+$".to_string()))
            .match_header("cookie", "sid=1")
            .match_header("user-agent", Matcher::Regex("Mozilla".to_string()))
            .with_status(200)
            .with_body(r#"{"aaData":[{"id":"1","name":"Foo","version":"1.0"}]}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let login = FakeLogin::succeeding("sid:1", false);
        let client = client_for(&server.url(), dir.path(), login.clone());

        let scripts = client.list_scripts().await.unwrap();
        mock.assert_async().await;
        assert_eq!(
            scripts,
            vec![RepoScript {
                id: "1".to_string(),
                name: "Foo".to_string(),
                version: "1.0".to_string(),
            }]
        );
        assert_eq!(login.calls(), 1);
    }

    #[tokio::test]
    async fn test_list_scripts_malformed_body_fails_after_retry() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", LISTING_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server.url(), dir.path(), FakeLogin::succeeding("sid:1", false));

        let result = client.list_scripts().await;
        mock.assert_async().await;
        assert!(matches!(result, Err(RepositoryError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_list_scripts_empty_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", LISTING_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("")
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server.url(), dir.path(), FakeLogin::succeeding("sid:1", false));
        assert!(matches!(
            client.list_scripts().await,
            Err(RepositoryError::EmptyBody(_))
        ));
    }

    #[tokio::test]
    async fn test_not_found_resets_login() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", LISTING_PATH)
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("Not Found")
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let login = FakeLogin::succeeding("sid:1", true);
        let client = client_for(&server.url(), dir.path(), login.clone());

        let result = client.list_scripts().await;
        mock.assert_async().await;
        assert_eq!(result.unwrap_err().status(), Some(StatusCode::NOT_FOUND));
        // Each 404 dropped the session, so the retry had to log in again
        assert_eq!(login.calls(), 2);
        assert!(!login_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_server_error_does_not_reset_login() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", LISTING_PATH)
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let login = FakeLogin::succeeding("sid:1", false);
        let client = client_for(&server.url(), dir.path(), login.clone());

        let result = client.list_scripts().await;
        assert_eq!(result.unwrap_err().status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(login.calls(), 1);
    }

    #[tokio::test]
    async fn test_update_script() {
        let mut server = Server::new_async().await;
        let url = server.url();
        let mock = server
            .mock("POST", "/script/edit/42/source/")
            .match_header("cookie", "sid=1")
            .match_header("referer", format!("{}/script/edit/42/source/", url).as_str())
            .match_header("content-type", Matcher::Regex("^multipart/form-data".to_string()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="version""#.to_string()),
                Matcher::Regex("2\\.1".to_string()),
                Matcher::Regex(r#"filename="MyScript.zip""#.to_string()),
                Matcher::Regex("application/zip".to_string()),
                Matcher::Regex("fake-archive-bytes".to_string()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path());
        let client = client_for(&url, dir.path(), FakeLogin::succeeding("sid:1", false));

        client.update_script("42", "2.1", &archive).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_script_rejected() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/script/edit/42/source/")
            .with_status(500)
            .with_body("version must increase")
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path());
        let client = client_for(&server.url(), dir.path(), FakeLogin::succeeding("sid:1", false));

        let err = client.update_script("42", "1.0", &archive).await.unwrap_err();
        mock.assert_async().await;
        match err {
            RepositoryError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "version must increase");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_update_script_other_success_status_is_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/script/edit/42/source/")
            .with_status(201)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path());
        let client = client_for(&server.url(), dir.path(), FakeLogin::succeeding("sid:1", false));

        let err = client.update_script("42", "1.0", &archive).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::CREATED));
    }

    #[tokio::test]
    async fn test_update_script_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let login = FakeLogin::succeeding("sid:1", false);
        let client = client_for("http://127.0.0.1:9", dir.path(), login.clone());

        let err = client
            .update_script("42", "1.0", &dir.path().join("missing.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Archive { .. }));
        assert_eq!(login.calls(), 0);
    }

    #[tokio::test]
    async fn test_reset_login_deletes_saved_login() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", LISTING_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"aaData":[]}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server.url(), dir.path(), FakeLogin::succeeding("sid:1", true));
        assert!(client.list_scripts().await.unwrap().is_empty());
        assert!(login_path(dir.path()).exists());

        client.reset_login().await;
        assert!(!login_path(dir.path()).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_always_carry_cookies() {
        let mut server = Server::new_async().await;
        // Every response is a stale-session 404, so resets race with sends
        let stale = server
            .mock("GET", LISTING_PATH)
            .match_query(Matcher::Any)
            .match_header("cookie", "sid=1")
            .with_status(404)
            .expect_at_least(1)
            .create_async()
            .await;
        let anonymous = server
            .mock("GET", LISTING_PATH)
            .match_query(Matcher::Any)
            .match_header("cookie", Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"aaData":[]}"#)
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server.url(), dir.path(), FakeLogin::succeeding("sid:1", false));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.list_scripts().await })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            let err = result.unwrap().unwrap_err();
            assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        }

        anonymous.assert_async().await;
        stale.assert_async().await;
    }

    #[test]
    fn test_decorate_get() {
        let client = Client::new();
        let request = client.get("https://repo.example/data").build().unwrap();
        let credential: Credential = "sid:1;tok:2".parse().unwrap();

        let request = decorate(request, &credential).unwrap();
        let cookies: Vec<_> = request
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["sid=1", "tok=2"]);
        assert_eq!(request.headers()[header::CONNECTION], "Keep-Alive");
        assert_eq!(request.headers()[header::ORIGIN], "https://repo.example");
        assert!(request.headers().get(header::REFERER).is_none());
    }

    #[test]
    fn test_decorate_post_sets_referer() {
        let client = Client::new();
        let request = client
            .post("https://repo.example/script/edit/1/source/")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=x")
            .build()
            .unwrap();

        let request = decorate(request, &Credential::default()).unwrap();
        assert_eq!(
            request.headers()[header::REFERER],
            "https://repo.example/script/edit/1/source/"
        );
        assert_eq!(
            request.headers()[header::CONTENT_TYPE],
            "multipart/form-data; boundary=x"
        );
        assert!(request.headers().get(header::COOKIE).is_none());
    }

    #[test]
    fn test_decorate_origin_drops_path() {
        let client = Client::new();
        let request = client
            .get("http://repo.example:8443/panel/data/scripter_panel/published_scripts?_=1")
            .build()
            .unwrap();

        let request = decorate(request, &Credential::default()).unwrap();
        assert_eq!(request.headers()[header::ORIGIN], "http://repo.example:8443");
    }

    #[test]
    fn test_decorate_rejects_unsendable_cookie() {
        let client = Client::new();
        let request = client.get("https://repo.example/").build().unwrap();
        let credential: Credential = "bad:line\nbreak".parse().unwrap();
        assert!(matches!(
            decorate(request, &credential),
            Err(RepositoryError::InvalidCookie(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let calls = AtomicUsize::new(0);
        let result = retry("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RepositoryError::EmptyBody("first".to_string()))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_two_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::InvalidResponse("nope".to_string()))
        })
        .await;
        assert!(matches!(result, Err(RepositoryError::InvalidResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_skips_authentication_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthenticationError::NoResult.into())
        })
        .await;
        assert!(matches!(result, Err(RepositoryError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
