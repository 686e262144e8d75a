//! CLI definition using clap derive.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use taskline_runtime::config::{DEFAULT_HISTORY_POLL_MS, DEFAULT_TASK_POLL_MS, EngineConfig};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "taskline", about = "Live, reconciled task timeline")]
pub struct Cli {
    /// Backend base URL
    #[arg(long, global = true, env = "TASKLINE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// State directory (default: $XDG_STATE_HOME/taskline)
    #[arg(long, global = true, env = "TASKLINE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Active session id; without one, every session is shown
    #[arg(long, short = 's', global = true, env = "TASKLINE_SESSION")]
    pub session: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Follow the timeline live
    Watch(WatchOpts),
    /// Print the timeline once
    Timeline(TimelineOpts),
    /// Hide everything before now for a session
    Reset(ResetOpts),
}

#[derive(clap::Args)]
pub struct PollOpts {
    /// Task list poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_TASK_POLL_MS)]
    pub task_poll_ms: u64,

    /// History poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_HISTORY_POLL_MS)]
    pub history_poll_ms: u64,

    /// Keep task streams open after they finish
    #[arg(long)]
    pub no_auto_close: bool,
}

impl PollOpts {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            task_poll_interval: Duration::from_millis(self.task_poll_ms),
            history_poll_interval: Duration::from_millis(self.history_poll_ms),
            auto_close: !self.no_auto_close,
            ..EngineConfig::default()
        }
    }
}

#[derive(clap::Args)]
pub struct WatchOpts {
    #[command(flatten)]
    pub poll: PollOpts,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

#[derive(clap::Args)]
pub struct TimelineOpts {
    #[command(flatten)]
    pub poll: PollOpts,

    /// Print the timeline as JSON
    #[arg(long)]
    pub json: bool,

    /// Give up waiting for the first snapshots after this many seconds
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

#[derive(clap::Args)]
pub struct ResetOpts {
    /// Session to reset (default: --session)
    pub session: Option<String>,

    /// Remove the session's marker instead of setting it
    #[arg(long)]
    pub clear: bool,
}

/// `$XDG_STATE_HOME/taskline`, else `$HOME/.local/state/taskline`, else a
/// per-user directory under /tmp.
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(dir).join("taskline");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/taskline");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/taskline-{user}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_defaults() {
        let cli = Cli::try_parse_from(["taskline", "watch"]).expect("parse");
        let Command::Watch(opts) = cli.command else {
            panic!("expected watch");
        };
        let config = opts.poll.engine_config();
        assert_eq!(config.task_poll_interval, Duration::from_millis(3000));
        assert_eq!(config.history_poll_interval, Duration::from_millis(5000));
        assert!(config.auto_close);
        assert_eq!(opts.color, "auto");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "taskline",
            "timeline",
            "--json",
            "--session",
            "s1",
            "--base-url",
            "http://backend:9000",
            "--no-auto-close",
        ])
        .expect("parse");
        assert_eq!(cli.session.as_deref(), Some("s1"));
        assert_eq!(cli.base_url, "http://backend:9000");
        let Command::Timeline(opts) = cli.command else {
            panic!("expected timeline");
        };
        assert!(opts.json);
        assert!(!opts.poll.engine_config().auto_close);
    }

    #[test]
    fn reset_positional_session() {
        let cli = Cli::try_parse_from(["taskline", "reset", "s9", "--clear"]).expect("parse");
        let Command::Reset(opts) = cli.command else {
            panic!("expected reset");
        };
        assert_eq!(opts.session.as_deref(), Some("s9"));
        assert!(opts.clear);
    }
}
