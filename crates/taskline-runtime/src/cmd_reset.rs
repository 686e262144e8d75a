//! `taskline reset`: record (or clear) a session's cutover marker.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;

use taskline_runtime::ResetStore;

pub fn cmd_reset(state_dir: &Path, session: Option<&str>, clear: bool) -> anyhow::Result<()> {
    let session = session.context("no session given: pass one or set TASKLINE_SESSION")?;
    let store = ResetStore::in_dir(state_dir);
    tracing::debug!(path = %store.path().display(), "loading reset markers");
    let mut markers = store.load()?;

    if clear {
        if markers.clear(session) {
            store.save(&markers)?;
            println!("session {session}: reset marker cleared");
        } else {
            println!("session {session}: no reset marker");
        }
        return Ok(());
    }

    let marker = markers.mark(session, Utc::now());
    store.save(&markers)?;
    println!("session {session}: entries before {} hidden", marker.to_rfc3339());
    Ok(())
}
