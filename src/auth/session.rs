//! HTTP session shared by the auth flow and the photos layer.
//!
//! Apple threads authentication state through response headers and cookies.
//! Every request made through [`Session`] captures the tracked headers into
//! typed secrets; the cookie jar rides along on the shared `reqwest`
//! client, so the photos layer inherits the cloud cookies automatically.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, Response};

use super::error::AuthError;

const SCNT_HEADER: &str = "scnt";
const SESSION_ID_HEADER: &str = "X-Apple-ID-Session-Id";
const SESSION_TOKEN_HEADER: &str = "X-Apple-Session-Token";
const TRUST_TOKEN_HEADER: &str = "X-Apple-TwoSV-Trust-Token";
const AASP_COOKIE: &str = "aasp";

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const TRUST_TOKEN_FILE: &str = ".trust-token.icloud";

/// Username and password as supplied by the user.
#[derive(Clone)]
pub struct AccountSecrets {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AccountSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSecrets")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Secrets captured from the signin response; required on every MFA and
/// trust request.
#[derive(Clone, Default)]
pub struct AuthSecrets {
    pub session_id: Option<String>,
    pub scnt: Option<String>,
    pub aasp: Option<String>,
}

impl std::fmt::Debug for AuthSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSecrets")
            .field("session_id", &self.session_id.as_deref().map(|_| "<set>"))
            .field("scnt", &self.scnt.as_deref().map(|_| "<set>"))
            .field("aasp", &self.aasp.as_deref().map(|_| "<set>"))
            .finish()
    }
}

/// The tokens worth persisting: the web auth token for setup and the trust
/// token that lets future logins skip MFA.
#[derive(Clone, Default)]
pub struct AccountTokens {
    pub session_token: Option<String>,
    pub trust_token: Option<String>,
}

impl std::fmt::Debug for AccountTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountTokens")
            .field(
                "session_token",
                &self.session_token.as_deref().map(|_| "<set>"),
            )
            .field("trust_token", &self.trust_token.as_deref().map(|_| "<set>"))
            .finish()
    }
}

/// Cookie-carrying HTTP session with Apple header capture.
pub struct Session {
    client: Client,
    pub auth_secrets: AuthSecrets,
    pub tokens: AccountTokens,
}

impl Session {
    pub fn new(home_endpoint: &str, timeout_secs: u64) -> Result<Self, AuthError> {
        let jar = Arc::new(reqwest::cookie::Jar::default());

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ORIGIN,
            HeaderValue::from_str(home_endpoint)
                .map_err(|_| AuthError::MissingHeader("Origin"))?,
        );
        default_headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{home_endpoint}/"))
                .map_err(|_| AuthError::MissingHeader("Referer"))?,
        );
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .cookie_provider(jar)
            .default_headers(default_headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            auth_secrets: AuthSecrets::default(),
            tokens: AccountTokens::default(),
        })
    }

    /// Clone of the underlying client (cheap, `Arc`-backed) so the photos
    /// layer shares cookies and connection pool.
    pub fn http_client(&self) -> Client {
        self.client.clone()
    }

    /// Headers every MFA/trust request must carry.
    pub fn mfa_headers(&self) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let session_id = self
            .auth_secrets
            .session_id
            .as_deref()
            .ok_or(AuthError::MissingHeader(SESSION_ID_HEADER))?;
        let scnt = self
            .auth_secrets
            .scnt
            .as_deref()
            .ok_or(AuthError::MissingHeader(SCNT_HEADER))?;
        headers.insert(
            SESSION_ID_HEADER,
            session_id
                .parse()
                .map_err(|_| AuthError::MissingHeader(SESSION_ID_HEADER))?,
        );
        headers.insert(
            SCNT_HEADER,
            scnt.parse().map_err(|_| AuthError::MissingHeader(SCNT_HEADER))?,
        );
        Ok(headers)
    }

    /// POST a JSON body, capturing tracked headers from the response.
    pub async fn post(
        &mut self,
        url: &str,
        body: &serde_json::Value,
        extra_headers: Option<HeaderMap>,
    ) -> Result<Response, AuthError> {
        let mut builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body.to_string());
        if let Some(h) = extra_headers {
            builder = builder.headers(h);
        }
        tracing::debug!("POST {}", url);
        let response = builder.send().await?;
        self.capture(&response);
        Ok(response)
    }

    /// PUT a JSON body, capturing tracked headers from the response.
    /// Apple's MFA resend endpoints are PUTs.
    pub async fn put(
        &mut self,
        url: &str,
        body: &serde_json::Value,
        extra_headers: Option<HeaderMap>,
    ) -> Result<Response, AuthError> {
        let mut builder = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body.to_string());
        if let Some(h) = extra_headers {
            builder = builder.headers(h);
        }
        tracing::debug!("PUT {}", url);
        let response = builder.send().await?;
        self.capture(&response);
        Ok(response)
    }

    /// GET, capturing tracked headers from the response.
    pub async fn get(
        &mut self,
        url: &str,
        extra_headers: Option<HeaderMap>,
    ) -> Result<Response, AuthError> {
        let mut builder = self.client.get(url);
        if let Some(h) = extra_headers {
            builder = builder.headers(h);
        }
        tracing::debug!("GET {}", url);
        let response = builder.send().await?;
        self.capture(&response);
        Ok(response)
    }

    /// Pull tracked auth headers and the `aasp` cookie out of a response.
    fn capture(&mut self, response: &Response) {
        let headers = response.headers();
        if let Some(v) = header_str(headers, SCNT_HEADER) {
            self.auth_secrets.scnt = Some(v);
        }
        if let Some(v) = header_str(headers, SESSION_ID_HEADER) {
            self.auth_secrets.session_id = Some(v);
        }
        if let Some(v) = header_str(headers, SESSION_TOKEN_HEADER) {
            self.tokens.session_token = Some(v);
        }
        if let Some(v) = header_str(headers, TRUST_TOKEN_HEADER) {
            self.tokens.trust_token = Some(v);
        }
        for cookie in headers.get_all(reqwest::header::SET_COOKIE) {
            if let Ok(s) = cookie.to_str() {
                if let Some(rest) = s.strip_prefix(&format!("{AASP_COOKIE}=")) {
                    let value = rest.split(';').next().unwrap_or_default();
                    self.auth_secrets.aasp = Some(value.to_string());
                }
            }
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

// ── Trust token persistence ─────────────────────────────────────────────

/// Read a persisted trust token from the data directory, if any.
pub fn load_trust_token(data_dir: &Path) -> Option<String> {
    let path = trust_token_path(data_dir);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let token = contents.trim().to_string();
            if token.is_empty() {
                None
            } else {
                tracing::debug!("Loaded trust token from {}", path.display());
                Some(token)
            }
        }
        Err(_) => None,
    }
}

/// Persist the trust token (mode 0600) so the next run can skip MFA.
pub fn persist_trust_token(data_dir: &Path, token: &str) -> std::io::Result<()> {
    let path = trust_token_path(data_dir);
    std::fs::write(&path, format!("{token}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    tracing::debug!("Persisted trust token to {}", path.display());
    Ok(())
}

/// Remove the persisted trust token (`--refresh-token`).
pub fn clear_trust_token(data_dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(trust_token_path(data_dir)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn trust_token_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TRUST_TOKEN_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn trust_token_round_trip() {
        let dir = tempdir().unwrap();
        assert!(load_trust_token(dir.path()).is_none());
        persist_trust_token(dir.path(), "HSARMTKN").unwrap();
        assert_eq!(load_trust_token(dir.path()).as_deref(), Some("HSARMTKN"));
        clear_trust_token(dir.path()).unwrap();
        assert!(load_trust_token(dir.path()).is_none());
        // Clearing twice is fine.
        clear_trust_token(dir.path()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn trust_token_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        persist_trust_token(dir.path(), "HSARMTKN").unwrap();
        let mode = std::fs::metadata(dir.path().join(TRUST_TOKEN_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn empty_token_file_reads_as_none() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(TRUST_TOKEN_FILE), "\n").unwrap();
        assert!(load_trust_token(dir.path()).is_none());
    }

    #[test]
    fn secrets_debug_redacts() {
        let secrets = AccountSecrets {
            username: "user@example.com".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{secrets:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn mfa_headers_require_captured_secrets() {
        let session = Session::new("https://www.icloud.com", 60).unwrap();
        assert!(matches!(
            session.mfa_headers(),
            Err(AuthError::MissingHeader(_))
        ));
    }
}
