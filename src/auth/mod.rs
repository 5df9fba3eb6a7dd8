//! Authentication state machine.
//!
//! ```text
//!                  authenticate()
//!   UNAUTHENTICATED ─────────────▶ (signin POST)
//!         │ 409                         │ 200
//!         ▼                             ▼
//!    MFA_REQUIRED ── submitMFA ──▶ AUTHENTICATED ── getTokens ──▶ TRUSTED
//!                                                                   │ setup
//!                                                                   ▼
//!                              READY ◀── warm-up query ──── SETUP_DONE
//! ```
//!
//! A login accepted outright (valid trust token) jumps straight to TRUSTED.
//! MFA input arrives over the typed channel from `crate::mfa`; each
//! transition validates the state it consumes, so a misordered call is a
//! programming error surfaced as [`AuthError::InvalidState`], never a
//! silent wrong request.

pub mod endpoints;
pub mod error;
pub mod mfa;
pub mod responses;
pub mod session;

use std::path::{Path, PathBuf};

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, Report};
use crate::mfa::{MfaMessage, MfaMethod};
use crate::shutdown::Interrupted;
use endpoints::Endpoints;
use error::{AuthError, TokenError};
use session::{AccountSecrets, Session};

/// Where in the login sequence the session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    MfaRequired,
    Authenticated,
    Trusted,
    SetupDone,
    Ready,
}

impl AuthState {
    pub fn name(self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "UNAUTHENTICATED",
            AuthState::MfaRequired => "MFA_REQUIRED",
            AuthState::Authenticated => "AUTHENTICATED",
            AuthState::Trusted => "TRUSTED",
            AuthState::SetupDone => "SETUP_DONE",
            AuthState::Ready => "READY",
        }
    }
}

/// Holds the HTTP session and drives the state transitions. After READY the
/// client is read-only for other components: the photos layer borrows the
/// HTTP client (cookies included) and the discovered photos domain.
pub struct AuthClient {
    session: Session,
    endpoints: Endpoints,
    state: AuthState,
    account: AccountSecrets,
    data_dir: PathBuf,
    photos_url: Option<String>,
    dsid: Option<String>,
}

impl AuthClient {
    pub fn new(
        account: AccountSecrets,
        data_dir: &Path,
        timeout_secs: u64,
    ) -> Result<Self, AuthError> {
        let endpoints = Endpoints::default();
        Ok(Self {
            session: Session::new(endpoints.home, timeout_secs)?,
            endpoints,
            state: AuthState::Unauthenticated,
            account,
            data_dir: data_dir.to_path_buf(),
            photos_url: None,
            dsid: None,
        })
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn http_client(&self) -> reqwest::Client {
        self.session.http_client()
    }

    /// The user-specific photos service root, known once SETUP_DONE.
    pub fn photos_url(&self) -> Option<&str> {
        self.photos_url.as_deref()
    }

    pub fn trust_token(&self) -> Option<&str> {
        self.session.tokens.trust_token.as_deref()
    }

    /// Directory-services ID of the account, known once SETUP_DONE.
    pub fn dsid(&self) -> Option<&str> {
        self.dsid.as_deref()
    }

    fn expect_state(&self, expected: AuthState) -> Result<(), AuthError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AuthError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    /// `UNAUTHENTICATED → TRUSTED | MFA_REQUIRED`. Posts the signin request
    /// with any persisted trust token; Apple answers 200 when the token is
    /// still honored and 409 when a second factor is needed.
    pub async fn authenticate(&mut self, trust_token: Option<String>) -> Result<AuthState, AuthError> {
        self.expect_state(AuthState::Unauthenticated)?;
        self.session.tokens.trust_token = trust_token;

        let body = json!({
            "accountName": self.account.username,
            "password": self.account.password,
            "trustTokens": [self.session.tokens.trust_token.as_deref().unwrap_or("")],
            "rememberMe": true,
        });
        let url = format!("{}/signin", self.endpoints.auth);
        let response = self.session.post(&url, &body, None).await?;

        match response.status().as_u16() {
            200 => {
                tracing::info!("Trust token accepted, skipping MFA");
                self.state = AuthState::Trusted;
            }
            409 => {
                tracing::info!("MFA required");
                self.state = AuthState::MfaRequired;
            }
            401 => return Err(AuthError::BadCredentials),
            403 => return Err(AuthError::UnknownUser),
            n => return Err(AuthError::UnexpectedHttp(n)),
        }
        Ok(self.state)
    }

    /// Ask Apple to dispatch a fresh code. Failures here are warnings; the
    /// user can simply try another method.
    pub async fn resend_mfa(
        &mut self,
        method: MfaMethod,
        phone_number_id: u32,
    ) -> Result<(), AuthError> {
        self.expect_state(AuthState::MfaRequired)?;
        let headers = self.session.mfa_headers()?;
        let url = mfa::resend_url(method, self.endpoints.auth);
        let payload = mfa::resend_payload(method, phone_number_id)
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        let response = self.session.put(&url, &payload, Some(headers)).await?;
        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or_default();

        if mfa::resend_accepted(method, status, &body) {
            tracing::info!("Resent MFA code via {}", method);
            Ok(())
        } else {
            Err(AuthError::UnexpectedResponse(format!(
                "Resend via {method} rejected with HTTP {status}"
            )))
        }
    }

    /// `MFA_REQUIRED → AUTHENTICATED` on an accepted code. `Ok(false)`
    /// means Apple rejected the code itself (retryable through the intake
    /// server); transport or protocol failures are fatal.
    pub async fn submit_mfa(&mut self, method: MfaMethod, code: &str) -> Result<bool, AuthError> {
        self.expect_state(AuthState::MfaRequired)?;
        let headers = self.session.mfa_headers()?;
        let url = mfa::submit_url(method, self.endpoints.auth);
        let payload = mfa::submit_payload(method, code, mfa::DEFAULT_PHONE_NUMBER_ID);

        let response = self.session.post(&url, &payload, Some(headers)).await?;
        let status = response.status().as_u16();
        if mfa::submit_accepted(method, status) {
            tracing::info!("MFA code accepted");
            self.state = AuthState::Authenticated;
            return Ok(true);
        }

        let text = response.text().await.unwrap_or_default();
        if text.contains(mfa::WRONG_CODE_MARKER) {
            tracing::warn!("MFA code rejected as incorrect");
            return Ok(false);
        }
        Err(AuthError::BadMfaCode(format!(
            "HTTP {status} submitting {method} code"
        )))
    }

    /// `AUTHENTICATED → TRUSTED`: trade the verified session for a session
    /// token and a fresh trust token.
    pub async fn get_tokens(&mut self) -> Result<(), TokenError> {
        if self.state != AuthState::Authenticated {
            return Err(TokenError::MissingToken("session"));
        }
        let headers = self
            .session
            .mfa_headers()
            .map_err(|_| TokenError::MissingToken("scnt"))?;
        let url = format!("{}/2sv/trust", self.endpoints.auth);
        let response = self.session.get(&url, Some(headers)).await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(TokenError::TrustRejected(status));
        }
        if self.session.tokens.session_token.is_none() {
            return Err(TokenError::MissingToken("X-Apple-Session-Token"));
        }
        if self.session.tokens.trust_token.is_none() {
            return Err(TokenError::MissingToken("X-Apple-TwoSV-Trust-Token"));
        }
        tracing::info!("Acquired session and trust tokens");
        self.state = AuthState::Trusted;
        Ok(())
    }

    /// `TRUSTED → SETUP_DONE`: account login against the setup service,
    /// which deposits the cloud cookies in the jar and names the per-user
    /// photos domain.
    pub async fn setup(&mut self) -> Result<String, AuthError> {
        self.expect_state(AuthState::Trusted)?;
        let body = json!({
            "dsWebAuthToken": self.session.tokens.session_token.as_deref().unwrap_or(""),
            "trustToken": self.session.tokens.trust_token.as_deref().unwrap_or(""),
            "extended_login": true,
        });
        let url = format!("{}/accountLogin", self.endpoints.setup);
        let response = self.session.post(&url, &body, None).await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(AuthError::UnexpectedHttp(status));
        }

        let text = response.text().await?;
        let data: responses::SetupResponse = serde_json::from_str(&text)?;
        let photos_url = data
            .photos_url()
            .ok_or(AuthError::MissingPhotosService)?
            .trim_end_matches('/')
            .to_string();

        self.dsid = data.ds_info.as_ref().and_then(|ds| ds.dsid_string());

        tracing::info!("Setup complete, photos domain {}", photos_url);
        self.photos_url = Some(photos_url.clone());
        self.state = AuthState::SetupDone;
        Ok(photos_url)
    }

    /// `SETUP_DONE → READY`, called by the orchestrator once the photos
    /// warm-up query succeeded.
    pub fn mark_ready(&mut self) -> Result<(), AuthError> {
        self.expect_state(AuthState::SetupDone)?;
        self.state = AuthState::Ready;
        Ok(())
    }

    /// Persist the current trust token for future runs.
    pub fn persist_trust_token(&self) -> Result<(), TokenError> {
        let token = self
            .session
            .tokens
            .trust_token
            .as_deref()
            .ok_or(TokenError::MissingToken("trust token"))?;
        session::persist_trust_token(&self.data_dir, token)?;
        Ok(())
    }
}

/// Drive the machine from UNAUTHENTICATED to TRUSTED, waiting on the MFA
/// channel when a second factor is demanded, and persist the trust token.
///
/// `fail_on_mfa` short-circuits MFA_REQUIRED for unattended environments.
pub async fn run_to_trusted(
    client: &mut AuthClient,
    trust_token: Option<String>,
    mfa_rx: &mut mpsc::Receiver<MfaMessage>,
    fail_on_mfa: bool,
    events: &EventSink,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    if client.authenticate(trust_token).await? == AuthState::MfaRequired {
        if fail_on_mfa {
            return Err(AuthError::FailOnMfa.into());
        }
        tracing::info!("Waiting for MFA code on the intake channel...");
        wait_for_mfa(client, mfa_rx, events, cancel).await?;
        client.get_tokens().await?;
    }

    if let Err(e) = client.persist_trust_token() {
        // Non-fatal: the next run just repeats MFA.
        events.warn(
            Report::new("MFA_WARNING", "Unable to persist trust token").with("cause", e),
        );
    }
    Ok(())
}

/// [`run_to_trusted`] plus the account setup that discovers the photos
/// domain and deposits the cloud cookies.
pub async fn run_to_setup(
    client: &mut AuthClient,
    trust_token: Option<String>,
    mfa_rx: &mut mpsc::Receiver<MfaMessage>,
    fail_on_mfa: bool,
    events: &EventSink,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    run_to_trusted(client, trust_token, mfa_rx, fail_on_mfa, events, cancel).await?;
    client.setup().await?;
    Ok(())
}

async fn wait_for_mfa(
    client: &mut AuthClient,
    mfa_rx: &mut mpsc::Receiver<MfaMessage>,
    events: &EventSink,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let message = tokio::select! {
            m = mfa_rx.recv() => m.ok_or(AuthError::MfaChannelClosed)?,
            _ = cancel.cancelled() => return Err(Interrupted.into()),
        };
        match message {
            MfaMessage::Resend {
                method,
                phone_number_id,
            } => {
                if let Err(e) = client.resend_mfa(method, phone_number_id).await {
                    events.warn(
                        Report::new("MFA_WARNING", "Resend failed")
                            .with("method", method)
                            .with("cause", e),
                    );
                }
            }
            MfaMessage::Submit { method, code } => match client.submit_mfa(method, &code).await? {
                true => return Ok(()),
                false => {
                    events.warn(
                        Report::new("MFA_WARNING", "Incorrect MFA code, awaiting another")
                            .with("method", method),
                    );
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AuthClient {
        AuthClient::new(
            AccountSecrets {
                username: "user@example.com".into(),
                password: "secret".into(),
            },
            Path::new("/tmp"),
            60,
        )
        .unwrap()
    }

    #[test]
    fn new_client_starts_unauthenticated() {
        let c = client();
        assert_eq!(c.state(), AuthState::Unauthenticated);
        assert!(c.photos_url().is_none());
    }

    #[tokio::test]
    async fn transitions_validate_current_state() {
        let mut c = client();
        // Submit before authenticate is a state error, not a request.
        match c.submit_mfa(MfaMethod::Device, "123456").await {
            Err(AuthError::InvalidState { expected, actual }) => {
                assert_eq!(expected, "MFA_REQUIRED");
                assert_eq!(actual, "UNAUTHENTICATED");
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
        match c.setup().await {
            Err(AuthError::InvalidState { expected, .. }) => assert_eq!(expected, "TRUSTED"),
            other => panic!("expected InvalidState, got {other:?}"),
        }
        assert!(matches!(
            c.mark_ready(),
            Err(AuthError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn get_tokens_requires_authenticated() {
        let mut c = client();
        assert!(matches!(
            c.get_tokens().await,
            Err(TokenError::MissingToken(_))
        ));
    }

    #[test]
    fn state_names_match_protocol() {
        assert_eq!(AuthState::MfaRequired.name(), "MFA_REQUIRED");
        assert_eq!(AuthState::SetupDone.name(), "SETUP_DONE");
    }
}
