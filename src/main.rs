//! icloud-photos-sync — one-way mirror of an iCloud Photos Library into a
//! local directory tree.
//!
//! Authenticates against Apple's private account APIs (including MFA over
//! a local intake server), enumerates the remote library through the
//! CloudKit-style photos endpoint, and reconciles a content-addressed
//! asset store plus a symlink album tree on disk. Supports one-shot syncs,
//! an archive operation that freezes album folders locally, and a
//! cron-scheduled daemon.

#![warn(clippy::all)]

mod archive;
mod auth;
mod cli;
mod config;
mod daemon;
mod events;
mod library;
mod lock;
mod mfa;
mod photos;
pub mod retry;
mod shutdown;
mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::session::AccountSecrets;
use auth::{AuthClient, AuthState};
use cli::Command;
use config::Config;
use events::{EventSink, Report};
use lock::LibraryLock;
use photos::{PhotosClient, Reauthenticate};
use shutdown::Interrupted;
use sync::{SyncConfig, SyncEngine};

/// Truncated at every process start.
const LOG_FILE: &str = ".icloud-photos-sync.log";

#[tokio::main]
async fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let command = cli.effective_command();
    let config = match Config::from_args(cli.shared) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        eprintln!("Unable to create data directory {}: {e}", config.data_dir.display());
        std::process::exit(5);
    }
    if let Err(e) = init_logging(&config) {
        eprintln!("Unable to initialize logging: {e}");
        std::process::exit(70);
    }

    let (sink, rx) = EventSink::channel();
    let collector = events::spawn_collector(rx);

    let cancel = match shutdown::install_signal_handler() {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("Unable to install signal handlers: {}", e);
            std::process::exit(70);
        }
    };

    let result = run(command, &config, &sink, &cancel).await;

    drop(sink);
    let _warnings = collector.await.unwrap_or_default();

    match result {
        Ok(()) => {}
        Err(e) => {
            let code = exit_code_for(&e);
            report_fatal(&e, &config);
            std::process::exit(code);
        }
    }
}

async fn run(
    command: Command,
    config: &Config,
    events: &EventSink,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::Token => with_lock(config, || run_token(config, events, cancel)).await,
        Command::Sync => with_lock(config, || run_pipeline(config, events, cancel, None)).await,
        Command::Archive { path, remote_delete } => {
            let target = (PathBuf::from(path), remote_delete);
            with_lock(config, || run_pipeline(config, events, cancel, Some(&target))).await
        }
        Command::Daemon => run_daemon(config, events, cancel).await,
    }
}

/// Run `body` under the library lock, releasing it on every exit path.
async fn with_lock<F, Fut>(config: &Config, body: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let lock = LibraryLock::acquire(&config.data_dir, config.force)?;
    let result = body().await;
    match lock.release(config.force) {
        Ok(()) => result,
        Err(release_err) => {
            if result.is_ok() {
                Err(release_err.into())
            } else {
                tracing::error!("Releasing library lock failed: {}", release_err);
                result
            }
        }
    }
}

async fn run_daemon(
    config: &Config,
    events: &EventSink,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let schedule = daemon::parse_schedule(&config.schedule)?;
    tracing::info!("Daemon started with schedule '{}'", config.schedule);

    daemon::run(&schedule, events, cancel, || {
        let events = events.clone();
        let cancel = cancel.clone();
        async move { with_lock(config, || run_pipeline(config, &events, &cancel, None)).await }
    })
    .await?;
    Ok(())
}

/// The full pipeline for one run: authenticate → warm up → sync →
/// (optionally) archive. The caller holds the library lock.
async fn run_pipeline(
    config: &Config,
    events: &EventSink,
    cancel: &CancellationToken,
    archive_target: Option<&(PathBuf, bool)>,
) -> anyhow::Result<()> {
    let (mut auth, mut mfa_rx, server) = prepare_auth(config, events).await?;

    let trust_token = resolve_trust_token(config)?;
    let auth_result = auth::run_to_setup(
        &mut auth,
        trust_token,
        &mut mfa_rx,
        config.fail_on_mfa,
        events,
        cancel,
    )
    .await;
    if let Some(server) = server {
        server.shutdown().await;
    }
    auth_result?;

    let photos_url = auth
        .photos_url()
        .expect("SETUP_DONE implies a photos URL")
        .to_string();
    let refresher: Arc<dyn Reauthenticate> = Arc::new(SessionRefresher {
        account: AccountSecrets {
            username: config.username.clone(),
            password: config.password.clone(),
        },
        data_dir: config.data_dir.clone(),
        timeout_secs: config.timeout_secs,
    });
    let photos = PhotosClient::new(
        &photos_url,
        auth.http_client(),
        auth.dsid().map(str::to_string),
        Some(refresher),
    );

    // Warm-up query gates READY.
    photos.check_indexing_state().await?;
    auth.mark_ready()?;
    tracing::info!("Session READY");

    let sync_config = SyncConfig {
        download_threads: config.download_threads,
        max_retry: config.max_retry,
        backoff: Default::default(),
    };
    let engine = SyncEngine {
        photos: &photos,
        config: &sync_config,
        events,
        cancel,
    };
    engine.sync_with_retry(&config.data_dir).await?;

    if let Some((path, remote_delete)) = archive_target {
        let resolved = if path.exists() {
            path.clone()
        } else {
            config.data_dir.join(path)
        };
        archive::archive_path(&config.data_dir, &resolved, &photos, *remote_delete, events)
            .await?;
    }

    Ok(())
}

/// The `token` command: drive auth to TRUSTED, persist and print the trust
/// token, skip photos setup entirely.
async fn run_token(
    config: &Config,
    events: &EventSink,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let (mut auth, mut mfa_rx, server) = prepare_auth(config, events).await?;

    let trust_token = resolve_trust_token(config)?;
    let result = auth::run_to_trusted(
        &mut auth,
        trust_token,
        &mut mfa_rx,
        config.fail_on_mfa,
        events,
        cancel,
    )
    .await;
    if let Some(server) = server {
        server.shutdown().await;
    }
    result?;

    println!("{}", auth.trust_token().unwrap_or_default());
    Ok(())
}

/// Build the auth client and the MFA intake channel. The intake server is
/// skipped under `--fail-on-mfa`; a failed bind is a warning (MFA then
/// simply can't be delivered).
async fn prepare_auth(
    config: &Config,
    events: &EventSink,
) -> anyhow::Result<(
    AuthClient,
    mpsc::Receiver<crate::mfa::MfaMessage>,
    Option<mfa::server::ServerHandle>,
)> {
    let auth = AuthClient::new(
        AccountSecrets {
            username: config.username.clone(),
            password: config.password.clone(),
        },
        &config.data_dir,
        config.timeout_secs,
    )?;

    let (mfa_tx, mfa_rx) = mpsc::channel(8);
    let server = if config.fail_on_mfa {
        None
    } else {
        match mfa::server::spawn(config.port, mfa_tx).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                events.warn(
                    Report::new("MFA_WARNING", "MFA intake server failed to bind")
                        .with("port", config.port)
                        .with("cause", e),
                );
                None
            }
        }
    };

    Ok((auth, mfa_rx, server))
}

fn resolve_trust_token(config: &Config) -> anyhow::Result<Option<String>> {
    if config.refresh_token {
        auth::session::clear_trust_token(&config.data_dir)?;
    }
    Ok(config
        .trust_token_override
        .clone()
        .or_else(|| auth::session::load_trust_token(&config.data_dir)))
}

/// Mid-sync session refresh: a silent re-login using the persisted trust
/// token. MFA cannot be answered here; a run that needs it fails and is
/// picked up interactively.
struct SessionRefresher {
    account: AccountSecrets,
    data_dir: PathBuf,
    timeout_secs: u64,
}

#[async_trait]
impl Reauthenticate for SessionRefresher {
    async fn refresh_session(&self) -> Result<reqwest::Client, String> {
        let mut client = AuthClient::new(self.account.clone(), &self.data_dir, self.timeout_secs)
            .map_err(|e| e.to_string())?;
        let token = auth::session::load_trust_token(&self.data_dir);
        let state = client.authenticate(token).await.map_err(|e| e.to_string())?;
        if state != AuthState::Trusted {
            return Err("re-authentication requires MFA; run `token` interactively".to_string());
        }
        client.setup().await.map_err(|e| e.to_string())?;
        tracing::info!("Session refreshed");
        Ok(client.http_client())
    }
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));

    let log_path = config.data_dir.join(LOG_FILE);
    let log_file = std::fs::File::create(&log_path)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(log_file)))
        .init();
    Ok(())
}

/// Map a fatal error to the process exit code of its kind.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<Interrupted>().is_some() {
        return shutdown::EXIT_INTERRUPTED;
    }
    if let Some(e) = err.downcast_ref::<sync::error::SyncError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<daemon::DaemonError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<archive::ArchiveError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<auth::error::AuthError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<auth::error::TokenError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<library::error::LibraryError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<photos::error::QueryError>() {
        return e.exit_code();
    }
    70
}

/// Top-level fatal handler: log with a report UUID; interrupts are quiet
/// and never reported.
fn report_fatal(err: &anyhow::Error, config: &Config) {
    if err.downcast_ref::<Interrupted>().is_some()
        || matches!(
            err.downcast_ref::<sync::error::SyncError>(),
            Some(sync::error::SyncError::Interrupted(_))
        )
        || matches!(
            err.downcast_ref::<daemon::DaemonError>(),
            Some(daemon::DaemonError::Interrupted(_))
        )
    {
        tracing::warn!("Interrupted, exiting");
        return;
    }

    let report_id = uuid::Uuid::new_v4();
    let report = Report::fatal("FATAL_ERROR", format!("{err:#}"))
        .with("reportId", report_id)
        .with("exitCode", exit_code_for(err));
    tracing::error!(kind = report.kind, "Fatal: {} (report {})", report.message, report_id);
    if config.enable_crash_reporting {
        tracing::info!(
            "Crash report {} recorded; log file at {}",
            report_id,
            config.data_dir.join(LOG_FILE).display()
        );
    }
}
