//! Cron-driven daemon: run a fresh sync on every schedule tick, with a
//! short retry ladder per run.
//!
//! The daemon owns nothing between ticks except the cron iterator. A run
//! that fails after all retries emits `FAILED` and waits for the next
//! tick; the schedule itself is never perturbed.

use std::str::FromStr;
use std::time::Duration;

use chrono::Local;
use cron::Schedule;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventSink};
use crate::shutdown::Interrupted;

/// Per-run retry delays.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(90),
];

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    BadSchedule { expression: String, reason: String },

    #[error("Scheduled run failed: {0}")]
    RunFailed(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl DaemonError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::Interrupted(_) => crate::shutdown::EXIT_INTERRUPTED,
            _ => 9,
        }
    }
}

/// Parse a cron expression. The `cron` crate wants a seconds field;
/// standard five-field expressions get one prepended.
pub fn parse_schedule(expression: &str) -> Result<Schedule, DaemonError> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| DaemonError::BadSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Run `run_sync` on every tick of `schedule` until cancelled.
///
/// Each invocation of `run_sync` is one full sync pipeline; a failed run
/// is retried after 10 s, 30 s, and 90 s before being declared FAILED for
/// this tick.
pub async fn run<F, Fut>(
    schedule: &Schedule,
    events: &EventSink,
    cancel: &CancellationToken,
    mut run_sync: F,
) -> Result<(), DaemonError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    loop {
        let next = match schedule.upcoming(Local).next() {
            Some(t) => t,
            None => {
                tracing::warn!("Schedule yields no further run times, stopping daemon");
                return Ok(());
            }
        };
        events.emit(Event::Scheduled {
            at: next.format("%Y-%m-%d %H:%M:%S").to_string(),
        });

        let wait = (next - Local::now())
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => return Err(Interrupted.into()),
        }

        events.emit(Event::RunStarted);
        match run_with_retries(events, cancel, &mut run_sync).await {
            Ok(()) => events.emit(Event::Done),
            Err(DaemonError::Interrupted(i)) => return Err(i.into()),
            Err(e) => {
                // The tick is spent; the next one is unaffected.
                events.emit(Event::Failed {
                    message: e.to_string(),
                });
            }
        }
    }
}

async fn run_with_retries<F, Fut>(
    events: &EventSink,
    cancel: &CancellationToken,
    run_sync: &mut F,
) -> Result<(), DaemonError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut last_error = String::new();
    for (attempt, delay) in std::iter::once(None)
        .chain(RETRY_DELAYS.iter().map(Some))
        .enumerate()
    {
        if let Some(delay) = delay {
            events.emit(Event::Retry {
                attempt: attempt as u32,
                delay_secs: delay.as_secs(),
            });
            tokio::select! {
                _ = tokio::time::sleep(*delay) => {}
                _ = cancel.cancelled() => return Err(Interrupted.into()),
            }
        }
        if cancel.is_cancelled() {
            return Err(Interrupted.into());
        }
        match run_sync().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if e.downcast_ref::<Interrupted>().is_some() {
                    return Err(Interrupted.into());
                }
                tracing::error!("Scheduled sync attempt failed: {:#}", e);
                last_error = format!("{e:#}");
            }
        }
    }
    Err(DaemonError::RunFailed(last_error))
}
