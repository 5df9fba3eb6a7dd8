//! Local HTTP intake for second-factor codes.
//!
//! Daemonized runs have no TTY, so the code is delivered out-of-band:
//! `POST /resend?method=sms&phoneNumberId=1` asks Apple for a fresh code,
//! `POST /mfa?code=123456` hands it to the auth state machine. Responses
//! are 200 on acceptance and 400 on malformed input. The server stops
//! itself after a successful submit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{valid_code, MfaMessage, MfaMethod};
use crate::auth::mfa::DEFAULT_PHONE_NUMBER_ID;

#[derive(Clone)]
struct ServerState {
    tx: mpsc::Sender<MfaMessage>,
    /// Method of the most recent resend; submits are attributed to it.
    last_method: Arc<Mutex<MfaMethod>>,
    stop: CancellationToken,
}

/// Running intake server. Dropping the handle does not stop it; call
/// [`ServerHandle::shutdown`] or let a successful submit stop it.
pub struct ServerHandle {
    stop: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub async fn shutdown(self) {
        self.stop.cancel();
        let _ = self.join.await;
    }
}

/// Bind the intake server on `port` and serve until shutdown.
pub async fn spawn(
    port: u16,
    tx: mpsc::Sender<MfaMessage>,
) -> std::io::Result<ServerHandle> {
    let stop = CancellationToken::new();
    let state = ServerState {
        tx,
        last_method: Arc::new(Mutex::new(MfaMethod::Device)),
        stop: stop.clone(),
    };

    let app = Router::new()
        .route("/mfa", post(handle_submit))
        .route("/resend", post(handle_resend))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("MFA intake server listening on port {}", port);

    let shutdown = stop.clone();
    let join = tokio::spawn(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = server.await {
            tracing::error!("MFA server error: {}", e);
        }
        tracing::debug!("MFA intake server stopped");
    });

    Ok(ServerHandle { stop, join })
}

async fn handle_submit(
    State(state): State<ServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    let code = match params.get("code") {
        Some(c) if valid_code(c) => c.clone(),
        _ => return (StatusCode::BAD_REQUEST, "Expected code=<6 digits>\n"),
    };

    let method = *state.last_method.lock().expect("method mutex poisoned");
    if state
        .tx
        .send(MfaMessage::Submit { method, code })
        .await
        .is_err()
    {
        return (StatusCode::BAD_REQUEST, "No authentication in progress\n");
    }

    // Job done; the machine owns the rest of the flow.
    state.stop.cancel();
    (StatusCode::OK, "Code accepted\n")
}

async fn handle_resend(
    State(state): State<ServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    let method = match params.get("method").and_then(|m| MfaMethod::parse(m)) {
        Some(m) => m,
        None => return (StatusCode::BAD_REQUEST, "Expected method={device|sms|voice}\n"),
    };
    let phone_number_id = match params.get("phoneNumberId") {
        Some(raw) => match raw.parse::<u32>() {
            Ok(id) => id,
            Err(_) => return (StatusCode::BAD_REQUEST, "phoneNumberId must be numeric\n"),
        },
        None => DEFAULT_PHONE_NUMBER_ID,
    };

    *state.last_method.lock().expect("method mutex poisoned") = method;
    if state
        .tx
        .send(MfaMessage::Resend {
            method,
            phone_number_id,
        })
        .await
        .is_err()
    {
        return (StatusCode::BAD_REQUEST, "No authentication in progress\n");
    }
    (StatusCode::OK, "Resend requested\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (ServerState, mpsc::Receiver<MfaMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (
            ServerState {
                tx,
                last_method: Arc::new(Mutex::new(MfaMethod::Device)),
                stop: CancellationToken::new(),
            },
            rx,
        )
    }

    fn query(pairs: &[(&str, &str)]) -> Query<HashMap<String, String>> {
        Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn submit_delivers_code_and_stops_server() {
        let (state, mut rx) = test_state();
        let stop = state.stop.clone();
        let (status, _) = handle_submit(State(state), query(&[("code", "123456")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            rx.recv().await.unwrap(),
            MfaMessage::Submit {
                method: MfaMethod::Device,
                code: "123456".into()
            }
        );
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn malformed_code_is_rejected() {
        let (state, mut rx) = test_state();
        for bad in ["1234", "abcdef", ""] {
            let (status, _) =
                handle_submit(State(state.clone()), query(&[("code", bad)])).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        let (status, _) = handle_submit(State(state), query(&[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn resend_updates_method_for_next_submit() {
        let (state, mut rx) = test_state();
        let (status, _) = handle_resend(
            State(state.clone()),
            query(&[("method", "sms"), ("phoneNumberId", "2")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            rx.recv().await.unwrap(),
            MfaMessage::Resend {
                method: MfaMethod::Sms,
                phone_number_id: 2
            }
        );

        let (status, _) = handle_submit(State(state), query(&[("code", "654321")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            rx.recv().await.unwrap(),
            MfaMessage::Submit {
                method: MfaMethod::Sms,
                code: "654321".into()
            }
        );
    }

    #[tokio::test]
    async fn resend_rejects_unknown_method() {
        let (state, _rx) = test_state();
        let (status, _) =
            handle_resend(State(state), query(&[("method", "fax")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn spawn_binds_and_shuts_down() {
        let (tx, _rx) = mpsc::channel(1);
        // Port 0 = ephemeral; enough to prove bind + graceful stop.
        let handle = spawn(0, tx).await.unwrap();
        handle.shutdown().await;
    }
}
