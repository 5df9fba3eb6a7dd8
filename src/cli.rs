use clap::{Parser, Subcommand, ValueEnum};

/// Log verbosity, settable via `--log-level` or `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Flags shared by every command. CLI values override the environment.
#[derive(Parser, Debug, Clone)]
pub struct SharedArgs {
    /// Apple ID email address
    #[arg(short = 'u', long, env = "APPLE_ID_USER")]
    pub username: Option<String>,

    /// Apple ID password (prompts when omitted).
    /// WARNING: --password is visible in process listings; prefer APPLE_ID_PWD.
    #[arg(short = 'p', long, env = "APPLE_ID_PWD")]
    pub password: Option<String>,

    /// Trust token from a previous MFA, overriding the persisted one
    #[arg(short = 'T', long, env = "TRUST_TOKEN")]
    pub trust_token: Option<String>,

    /// Data directory holding the local library
    #[arg(short = 'd', long, env = "DATA_DIR", default_value = "/opt/icloud-photos-library")]
    pub data_dir: String,

    /// Port for the MFA intake server
    #[arg(long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    /// Override an existing library lock / foreign lock at release
    #[arg(long, env = "FORCE")]
    pub force: bool,

    /// Discard the persisted trust token before authenticating
    #[arg(long)]
    pub refresh_token: bool,

    /// Fail instead of waiting for MFA input (unattended environments)
    #[arg(long, env = "FAIL_ON_MFA")]
    pub fail_on_mfa: bool,

    /// Concurrent asset downloads
    #[arg(long, env = "DOWNLOAD_THREADS", default_value_t = 16)]
    pub download_threads: usize,

    /// Cron expression for daemon mode
    #[arg(long, env = "SCHEDULE", default_value = "0 2 * * *")]
    pub schedule: String,

    /// Attach the log file to fatal error reports
    #[arg(long, env = "ENABLE_CRASH_REPORTING")]
    pub enable_crash_reporting: bool,

    /// Log verbosity
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Full-sync retries on fatal errors
    #[arg(long, default_value_t = 2)]
    pub max_retry: u32,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Acquire (and persist) a trust token, then exit
    Token,

    /// Run one sync and exit
    Sync,

    /// Freeze an album folder locally
    Archive {
        /// Path of the album to archive (a display-name link in the library)
        path: String,

        /// Also delete the album's non-favorite assets from iCloud
        #[arg(long)]
        remote_delete: bool,
    },

    /// Run syncs on a cron schedule (default command)
    Daemon,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "icloud-photos-sync",
    version,
    about = "One-way sync of an iCloud Photos Library into a local directory tree"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub shared: SharedArgs,
}

impl Cli {
    /// The daemon is the default when no command is given.
    pub fn effective_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Daemon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn defaults_to_daemon() {
        let cli = parse(&["icloud-photos-sync"]);
        assert!(matches!(cli.effective_command(), Command::Daemon));
        assert_eq!(cli.shared.data_dir, "/opt/icloud-photos-library");
        assert_eq!(cli.shared.port, 80);
        assert_eq!(cli.shared.download_threads, 16);
        assert_eq!(cli.shared.schedule, "0 2 * * *");
        assert_eq!(cli.shared.timeout, 60);
        assert_eq!(cli.shared.max_retry, 2);
    }

    #[test]
    fn archive_takes_path_and_opt_in_delete() {
        let cli = parse(&["icloud-photos-sync", "archive", "./Family"]);
        match cli.effective_command() {
            Command::Archive { path, remote_delete } => {
                assert_eq!(path, "./Family");
                assert!(!remote_delete);
            }
            other => panic!("expected Archive, got {other:?}"),
        }

        let cli = parse(&["icloud-photos-sync", "archive", "./Family", "--remote-delete"]);
        assert!(matches!(
            cli.effective_command(),
            Command::Archive { remote_delete: true, .. }
        ));
    }

    #[test]
    fn short_flags_parse() {
        let cli = parse(&[
            "icloud-photos-sync",
            "-u",
            "user@example.com",
            "-p",
            "pw",
            "-T",
            "token",
            "-d",
            "/data",
            "sync",
        ]);
        assert_eq!(cli.shared.username.as_deref(), Some("user@example.com"));
        assert_eq!(cli.shared.trust_token.as_deref(), Some("token"));
        assert_eq!(cli.shared.data_dir, "/data");
        assert!(matches!(cli.effective_command(), Command::Sync));
    }

    #[test]
    fn invalid_flag_is_a_parse_error() {
        assert!(Cli::try_parse_from(["icloud-photos-sync", "--no-such-flag"]).is_err());
    }

    #[test]
    fn log_level_values() {
        let cli = parse(&["icloud-photos-sync", "--log-level", "trace"]);
        assert_eq!(cli.shared.log_level, LogLevel::Trace);
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
    }
}
