//! taskline: live, reconciled timeline for a remote task console.
//!
//! Polls the task and history snapshots, streams live events for in-flight
//! tasks, and merges everything into one ordered timeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use taskline_runtime::{ApiClient, EngineConfig, EngineSources, ResetStore, TimelineEngine};

mod cli;
mod cmd_reset;
mod cmd_timeline;
mod cmd_watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("TASKLINE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let state_dir = args.state_dir.clone().unwrap_or_else(cli::default_state_dir);

    match args.command {
        cli::Command::Watch(ref opts) => {
            let engine = build_engine(&args, opts.poll.engine_config(), &state_dir)?;
            cmd_watch::cmd_watch(engine, &opts.color).await?;
        }
        cli::Command::Timeline(ref opts) => {
            let engine = build_engine(&args, opts.poll.engine_config(), &state_dir)?;
            cmd_timeline::cmd_timeline(
                engine,
                opts.json,
                Duration::from_secs(opts.timeout_secs),
                &opts.color,
            )
            .await?;
        }
        cli::Command::Reset(ref opts) => {
            let session = opts.session.as_deref().or(args.session.as_deref());
            cmd_reset::cmd_reset(&state_dir, session, opts.clear)?;
        }
    }

    Ok(())
}

fn build_engine(args: &cli::Cli, config: EngineConfig, state_dir: &Path) -> anyhow::Result<Arc<TimelineEngine>> {
    let api = ApiClient::new(&args.base_url)?;
    let sources = EngineSources::http(&api, &config);
    tracing::info!(base_url = %args.base_url, session = ?args.session, "connecting");
    let engine = TimelineEngine::new(config, sources, ResetStore::in_dir(state_dir), args.session.clone())?;
    Ok(Arc::new(engine))
}
