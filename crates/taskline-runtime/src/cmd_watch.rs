//! `taskline watch`: live timeline view.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use taskline_runtime::TimelineEngine;
use taskline_runtime::render::{format_timeline, resolve_color};

pub async fn cmd_watch(engine: Arc<TimelineEngine>, color: &str) -> anyhow::Result<()> {
    let use_color = resolve_color(color);
    let cancel = CancellationToken::new();
    let runner = tokio::spawn({
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        async move { engine.run(cancel).await }
    });

    let mut updates = engine.subscribe_timeline();
    let mut last_drawn = None;
    loop {
        let timeline = updates.borrow_and_update().clone();
        let view = (timeline.entries.clone(), timeline.stale, timeline.retrying);
        if last_drawn.as_ref() != Some(&view) {
            // Clear screen + cursor home
            print!("\x1b[2J\x1b[H");
            println!("{}", format_timeline(&timeline, use_color));
            if use_color {
                println!("\n\x1b[2mtaskline watch | Ctrl-C to quit\x1b[0m");
            } else {
                println!("\ntaskline watch | Ctrl-C to quit");
            }
            last_drawn = Some(view);
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    cancel.cancel();
    runner.await?;
    Ok(())
}
