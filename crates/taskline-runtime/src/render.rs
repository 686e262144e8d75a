//! Plain-text rendering of a reconciled timeline.

use taskline_core::{Role, TaskStatus, Timeline, TimelineEntry};

const DIM: &str = "\x1b[2m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Resolve `auto|always|never` against whether stdout is a terminal.
pub fn resolve_color(color: &str) -> bool {
    use std::io::IsTerminal;
    match color {
        "always" => true,
        "never" => false,
        _ => std::io::stdout().is_terminal(),
    }
}

/// `HH:MM:SS  role       content [status]`
pub fn format_entry(entry: &TimelineEntry, use_color: bool) -> String {
    let time = entry
        .timestamp
        .map(|ts| ts.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());

    let content = if entry.has_content() {
        entry.content.trim_end().replace('\n', "\n                    ")
    } else if entry.pending {
        "\u{2026}".to_string()
    } else {
        String::new()
    };

    let suffix = match entry.status {
        Some(status) if status.is_in_flight() => format!(" [{}]", status.as_str().to_lowercase()),
        Some(status @ (TaskStatus::Failed | TaskStatus::Lost)) => {
            format!(" [{}]", status.as_str().to_lowercase())
        }
        _ if entry.pending => " [sending]".to_string(),
        _ => String::new(),
    };

    let line = format!("{time}  {:<9}  {content}{suffix}", entry.role.as_str());
    if !use_color {
        return line;
    }
    let color = match (entry.role, entry.status) {
        (_, Some(TaskStatus::Failed | TaskStatus::Lost)) => RED,
        _ if entry.pending => DIM,
        (Role::User, _) => CYAN,
        _ => return line,
    };
    format!("{color}{line}{RESET}")
}

pub fn format_timeline(timeline: &Timeline, use_color: bool) -> String {
    if timeline.entries.is_empty() {
        return "(no entries)".to_string();
    }
    let mut out: Vec<String> = timeline
        .entries
        .iter()
        .map(|e| format_entry(e, use_color))
        .collect();

    let mut flags = Vec::new();
    if timeline.retrying {
        flags.push("backend unavailable, retrying");
    }
    if timeline.stale {
        flags.push("showing last known data");
    }
    if !flags.is_empty() {
        let note = format!("({})", flags.join("; "));
        out.push(if use_color { format!("{DIM}{note}{RESET}") } else { note });
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 5, 7)
            .single()
            .expect("valid datetime")
    }

    #[test]
    fn user_line() {
        let entry = TimelineEntry::user("Explain X", Some("abc".into())).at(at());
        assert_eq!(format_entry(&entry, false), "09:05:07  user       Explain X");
    }

    #[test]
    fn pending_assistant_shows_ellipsis_and_status() {
        let entry = TimelineEntry::assistant("", Some("abc".into())).with_status(TaskStatus::Processing);
        assert_eq!(format_entry(&entry, false), "--:--:--  assistant  \u{2026} [processing]");
    }

    #[test]
    fn failed_is_red_when_colored() {
        let entry = TimelineEntry::assistant("oops", Some("abc".into())).with_status(TaskStatus::Failed);
        let line = format_entry(&entry, true);
        assert!(line.starts_with(RED));
        assert!(line.contains("[failed]"));
    }

    #[test]
    fn timeline_flags_footer() {
        let mut timeline = Timeline::empty(at());
        assert_eq!(format_timeline(&timeline, false), "(no entries)");

        timeline.entries.push(TimelineEntry::user("q", None).at(at()));
        timeline.retrying = true;
        let text = format_timeline(&timeline, false);
        assert!(text.ends_with("(backend unavailable, retrying)"));
    }
}
