//! Typed event stream between the sync pipeline and the top-level supervisor.
//!
//! Warnings never abort the operation that raised them; they are pushed onto
//! this channel and logged (and, with crash reporting enabled, attached to
//! the report) by the collector task. Fatal errors travel the ordinary
//! `Result` path instead.

use tokio::sync::mpsc;

/// How bad it is. Warnings are surfaced and the run continues; fatals abort
/// the current operation and bubble to the top-level handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Fatal,
}

/// A structured report: stable kind tag, severity, human message, and a
/// free-form attribute bag for crash reporting.
#[derive(Debug, Clone)]
pub struct Report {
    pub kind: &'static str,
    pub severity: Severity,
    pub message: String,
    pub context: Vec<(String, String)>,
}

impl Report {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warn,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn fatal(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            ..Self::new(kind, message)
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.context.push((key.to_string(), value.to_string()));
        self
    }
}

/// Lifecycle and warning events observed by the supervisor.
#[derive(Debug, Clone)]
pub enum Event {
    Warning(Report),
    /// Daemon: the next run has been scheduled.
    Scheduled { at: String },
    /// Daemon: a run has begun.
    RunStarted,
    /// Daemon: the run finished cleanly.
    Done,
    /// Daemon: the run failed and will be retried after `delay_secs`.
    Retry { attempt: u32, delay_secs: u64 },
    /// Daemon: the run failed and retries are exhausted.
    Failed { message: String },
}

/// Cloneable sending half handed to every component.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink whose events go nowhere. For tests and one-shot helpers.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        // The receiver only disappears during shutdown; losing a late event
        // then is fine.
        let _ = self.tx.send(event);
    }

    pub fn warn(&self, report: Report) {
        tracing::warn!(kind = report.kind, "{}", report.message);
        self.emit(Event::Warning(report));
    }
}

/// Drain the event stream, logging lifecycle events. Returns the warnings
/// seen, so the top-level handler can attach them to a crash report.
pub fn spawn_collector(
    mut rx: mpsc::UnboundedReceiver<Event>,
) -> tokio::task::JoinHandle<Vec<Report>> {
    tokio::spawn(async move {
        let mut warnings = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                Event::Warning(report) => warnings.push(report),
                Event::Scheduled { at } => tracing::info!("Next sync scheduled for {}", at),
                Event::RunStarted => tracing::info!("Scheduled sync starting"),
                Event::Done => tracing::info!("Scheduled sync finished"),
                Event::Retry {
                    attempt,
                    delay_secs,
                } => tracing::warn!(
                    "Scheduled sync failed, retry {} in {}s",
                    attempt,
                    delay_secs
                ),
                Event::Failed { message } => {
                    tracing::error!("Scheduled sync failed permanently: {}", message)
                }
            }
        }
        warnings
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_context_accumulates() {
        let r = Report::new("SYNC_WARNING", "asset skipped")
            .with("recordName", "ABC")
            .with("attempts", 4);
        assert_eq!(r.context.len(), 2);
        assert_eq!(r.context[1], ("attempts".to_string(), "4".to_string()));
    }

    #[tokio::test]
    async fn collector_returns_warnings() {
        let (sink, rx) = EventSink::channel();
        let handle = spawn_collector(rx);
        sink.warn(Report::new("LIBRARY_WARNING", "stray file"));
        sink.emit(Event::Done);
        drop(sink);
        let warnings = handle.await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, "LIBRARY_WARNING");
    }

    #[tokio::test]
    async fn disconnected_sink_does_not_panic() {
        let sink = EventSink::disconnected();
        sink.warn(Report::new("SYNC_WARNING", "nobody listening"));
    }
}
