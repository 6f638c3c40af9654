//! Plain-text rendering of monitor snapshots

use maildcn_core::view::EventSummary;
use maildcn_core::{MonitorSnapshot, PanelView, PlaybackState};
use serde_json::Value;
use std::fmt::Write;

fn text<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_str))
}

/// One stored email: id, sender, subject and its spam/encryption flags
pub fn email_line(email: &Value) -> String {
    let mut line = format!(
        "{:<26} {:<28} {}",
        text(email, &["_id", "email_id", "id"]).unwrap_or("-"),
        text(email, &["from"]).unwrap_or("-"),
        text(email, &["subject"]).unwrap_or("(no subject)"),
    );
    let spam = email
        .pointer("/ai_analysis/spam_analysis/is_spam")
        .and_then(Value::as_bool);
    if spam == Some(true) {
        line.push_str("  [spam]");
    }
    if email.get("is_encrypted").and_then(Value::as_bool) == Some(true) {
        line.push_str("  [encrypted]");
    }
    line
}

pub fn log_line(entry: &Value) -> String {
    let time = text(entry, &["timestamp"]).unwrap_or("");
    match (
        text(entry, &["action", "type", "level"]),
        text(entry, &["details", "message"]),
    ) {
        (Some(kind), Some(details)) => format!("{}  {:<20} {}", time, kind, details),
        (None, Some(details)) => format!("{}  {}", time, details),
        _ => entry.to_string(),
    }
}

pub fn event_line(event: &EventSummary) -> String {
    let mut line = format!(
        "{:>8}  {:<8} {:<28} {}",
        event.time, event.protocol, event.stage, event.details
    );
    if let Some(data) = &event.data {
        for row in data.lines() {
            let _ = write!(line, "\n          {}", row);
        }
    }
    line
}

pub fn panel(panel: &PanelView) -> String {
    let mut out = String::new();
    match panel {
        PanelView::Protocol {
            name,
            description,
            total,
            events,
            ..
        } => {
            let _ = writeln!(out, "== {} ({} events) ==", name, total);
            let _ = writeln!(out, "{}", description);
            if events.is_empty() {
                out.push_str("  no events yet\n");
            }
            for event in events {
                let _ = writeln!(out, "  {}", event_line(event));
            }
        }
        PanelView::Step {
            index,
            total,
            title,
            subtitle,
            explanation,
        } => {
            let _ = writeln!(out, "== Step {}/{}: {} ==", index, total, title);
            let _ = writeln!(out, "{}", subtitle);
            let _ = writeln!(out, "{}", explanation);
        }
        PanelView::Overview(overview) => {
            let _ = writeln!(
                out,
                "== System overview: {} processes, {} active protocols ==",
                overview.total_processes, overview.active_protocols
            );
            for stat in &overview.protocols {
                let marker = if stat.active { "*" } else { " " };
                let _ = writeln!(out, " {} {:<10} {}", marker, stat.name, stat.count);
            }
        }
    }
    out
}

pub fn status(snapshot: &MonitorSnapshot) -> String {
    let mut out = String::new();
    let playback = &snapshot.playback;
    let state = match playback.state {
        PlaybackState::Idle => "idle",
        PlaybackState::Playing => "playing",
        PlaybackState::Paused => "paused",
        PlaybackState::Finished => "finished",
    };

    let _ = writeln!(out, "channel: {}", snapshot.connection);
    let _ = writeln!(
        out,
        "story:   {} step {}/{} {} (speed {}x)",
        state, playback.step, playback.total, playback.title, snapshot.speed
    );
    let _ = writeln!(
        out,
        "events:  {} live, {} total, {} pending",
        snapshot.live, snapshot.history, snapshot.pending_recent
    );

    let nodes: Vec<String> = snapshot
        .nodes
        .iter()
        .map(|n| {
            let mut label = format!("{}:{}", n.id, n.events);
            if n.active {
                label.push('*');
            }
            if n.selected {
                label = format!("[{}]", label);
            }
            label
        })
        .collect();
    let _ = writeln!(out, "nodes:   {}", nodes.join(" "));

    let flow: Vec<String> = snapshot
        .edges
        .iter()
        .filter(|e| e.highlighted)
        .map(|e| format!("{} -> {}", e.edge.from, e.edge.to))
        .collect();
    if !flow.is_empty() {
        let _ = writeln!(out, "flow:    {}", flow.join(", "));
    }

    out.push_str(&panel(&snapshot.panel));
    out
}

/// Turns successive snapshots into the lines worth printing
#[derive(Debug, Default)]
pub struct Feed {
    last: Option<MonitorSnapshot>,
}

impl Feed {
    pub fn update(&mut self, snapshot: &MonitorSnapshot) -> Vec<String> {
        let mut lines = Vec::new();
        let previous = self.last.as_ref();

        if previous.map(|p| p.connection) != Some(snapshot.connection) {
            lines.push(format!("-- channel {}", snapshot.connection));
        }

        // both lists are newest first; the totals say how many are new
        let seen = previous.map_or(0, |p| p.recent_total);
        let fresh = fresh_count(snapshot.recent_total, seen, snapshot.recent.len());
        lines.extend(snapshot.recent[..fresh].iter().rev().map(event_line));

        let seen = previous.map_or(0, |p| p.notices_total);
        let fresh = fresh_count(snapshot.notices_total, seen, snapshot.notices.len());
        lines.extend(snapshot.notices[..fresh].iter().rev().cloned());

        if let Some(previous) = previous {
            if previous.panel != snapshot.panel && !matches!(snapshot.panel, PanelView::Overview(_))
            {
                lines.push(panel(&snapshot.panel));
            }
        }

        self.last = Some(snapshot.clone());
        lines
    }
}

fn fresh_count(total: u64, seen: u64, available: usize) -> usize {
    usize::try_from(total.saturating_sub(seen)).map_or(available, |n| n.min(available))
}
