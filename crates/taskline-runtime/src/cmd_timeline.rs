//! `taskline timeline`: one reconciled view once the first snapshots land.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskline_runtime::TimelineEngine;
use taskline_runtime::render::{format_timeline, resolve_color};

pub async fn cmd_timeline(
    engine: Arc<TimelineEngine>,
    json: bool,
    timeout: Duration,
    color: &str,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let runner = tokio::spawn({
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        async move { engine.run(cancel).await }
    });

    let mut updates = engine.subscribe_timeline();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    while !engine.sources_settled().await {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut deadline => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "timed out waiting for first snapshots");
                break;
            }
        }
    }

    let timeline = engine.recompute().await;
    cancel.cancel();
    runner.await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&*timeline)?);
    } else {
        println!("{}", format_timeline(&timeline, resolve_color(color)));
    }
    Ok(())
}
