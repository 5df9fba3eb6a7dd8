use std::path::PathBuf;

use crate::cli::{LogLevel, SharedArgs};

/// Resolved runtime configuration. CLI overrides env (clap handles the
/// precedence); secrets are scrubbed from the environment once this is
/// built.
pub struct Config {
    pub username: String,
    pub password: String,
    pub trust_token_override: Option<String>,
    pub data_dir: PathBuf,
    pub port: u16,
    pub force: bool,
    pub refresh_token: bool,
    pub fail_on_mfa: bool,
    pub download_threads: usize,
    pub schedule: String,
    pub enable_crash_reporting: bool,
    pub log_level: LogLevel,
    pub timeout_secs: u64,
    pub max_retry: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "trust_token_override",
                &self.trust_token_override.as_deref().map(|_| "<redacted>"),
            )
            .field("data_dir", &self.data_dir)
            .field("port", &self.port)
            .field("schedule", &self.schedule)
            .field("download_threads", &self.download_threads)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Assemble the configuration, prompting for the password when neither
    /// flag nor env supplied one (interactive runs only).
    pub fn from_args(args: SharedArgs) -> anyhow::Result<Self> {
        let username = args
            .username
            .ok_or_else(|| anyhow::anyhow!("Username is required (-u or APPLE_ID_USER)"))?;

        let password = match args.password {
            Some(p) => p,
            None => rpassword::prompt_password("Apple ID password: ")
                .map_err(|e| anyhow::anyhow!("No password provided and prompt failed: {e}"))?,
        };

        let config = Self {
            username,
            password,
            trust_token_override: args.trust_token,
            data_dir: expand_tilde(&args.data_dir),
            port: args.port,
            force: args.force,
            refresh_token: args.refresh_token,
            fail_on_mfa: args.fail_on_mfa,
            download_threads: args.download_threads.max(1),
            schedule: args.schedule,
            enable_crash_reporting: args.enable_crash_reporting,
            log_level: args.log_level,
            timeout_secs: args.timeout,
            max_retry: args.max_retry,
        };

        scrub_environment();
        Ok(config)
    }
}

/// Replace secret-bearing environment variables with placeholders so they
/// don't leak through child processes or diagnostics.
fn scrub_environment() {
    for (var, placeholder) in [
        ("APPLE_ID_PWD", "<APPLE ID PASSWORD>"),
        ("TRUST_TOKEN", "<TRUST TOKEN>"),
    ] {
        if std::env::var_os(var).is_some() {
            std::env::set_var(var, placeholder);
        }
    }
}
