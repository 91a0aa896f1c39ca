//! Per-session structured log.
//!
//! Console output goes through `tracing`; this file is the machine-readable
//! channel: one JSON object per line in `<service>_<session_id>.jsonl` under
//! the configured log directory. A filesystem failure downgrades the logger
//! to console-only rather than stalling the pipeline.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

/// Log entry category, mirrored in the JSONL `category` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Brain,
    State,
    Speak,
    Comment,
    Viewer,
    System,
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Brain => "BRAIN",
            LogCategory::State => "STATE",
            LogCategory::Speak => "SPEAK",
            LogCategory::Comment => "COMMENT",
            LogCategory::Viewer => "VIEWER",
            LogCategory::System => "SYSTEM",
            LogCategory::Error => "ERROR",
        }
    }
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    level: &'a str,
    category: &'a str,
    message: &'a str,
    data: &'a Value,
    session_id: &'a str,
    service: &'a str,
}

pub struct SessionLog {
    service: String,
    session_id: String,
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl SessionLog {
    pub fn new(service: &str, log_dir: &Path) -> Self {
        let session_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let path = log_dir.join(format!("{service}_{session_id}.jsonl"));

        let writer = fs::create_dir_all(log_dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
            .map(BufWriter::new)
            .map_err(|error| {
                warn!(path = %path.display(), %error, "session log unavailable, console only");
                error
            })
            .ok();

        Self {
            service: service.to_string(),
            session_id,
            path,
            writer: Mutex::new(writer),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self, category: LogCategory, level: &str, message: &str, data: Value) {
        let entry = LogEntry {
            timestamp: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
            level,
            category: category.as_str(),
            message,
            data: &data,
            session_id: &self.session_id,
            service: &self.service,
        };

        let mut guard = self.writer.lock();
        if let Some(writer) = guard.as_mut() {
            let failed = serde_json::to_string(&entry)
                .map_err(std::io::Error::other)
                .and_then(|line| writeln!(writer, "{line}"))
                .and_then(|_| writer.flush())
                .is_err();
            if failed {
                warn!(path = %self.path.display(), "session log write failed, console only");
                *guard = None;
            }
        }
    }

    pub fn decision(&self, action: &str, reason: &str, priority: u8, intent: &str, phase: &str) {
        self.entry(
            LogCategory::Brain,
            "INFO",
            &format!("Decision: {action}"),
            json!({
                "action": action,
                "reason": reason,
                "priority": priority,
                "intent": intent,
                "state": phase,
            }),
        );
    }

    pub fn transition(&self, from: &str, to: &str, trigger: &str) {
        self.entry(
            LogCategory::State,
            "INFO",
            &format!("{from} -> {to}"),
            json!({ "from": from, "to": to, "trigger": trigger }),
        );
    }

    pub fn speak(&self, text: &str, intent: &str, priority: u8, viewers: u64) {
        self.entry(
            LogCategory::Speak,
            "INFO",
            &format!("\"{}\"", preview(text, 50)),
            json!({ "intent": intent, "priority": priority, "viewers": viewers }),
        );
    }

    pub fn comment(&self, username: &str, text: &str, intent: &str) {
        self.entry(
            LogCategory::Comment,
            "DEBUG",
            &format!("[{username}] \"{}\"", preview(text, 30)),
            json!({ "intent": intent }),
        );
    }

    pub fn viewer(&self, count: u64, delta: i64) {
        self.entry(
            LogCategory::Viewer,
            "INFO",
            &format!("Viewers: {count} ({delta:+})"),
            json!({ "count": count, "delta": delta }),
        );
    }

    pub fn session_start(&self, data: Value) {
        self.entry(LogCategory::System, "INFO", "Session started", data);
    }

    pub fn session_end(&self, uptime: f64, data: Value) {
        self.entry(
            LogCategory::System,
            "INFO",
            &format!("Session ended after {uptime:.1}s"),
            data,
        );
    }

    pub fn error(&self, message: &str, data: Value) {
        self.entry(LogCategory::Error, "ERROR", message, data);
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new("orchestrator", dir.path());

        log.session_start(json!({ "input": "classified_comments" }));
        log.decision("SPEAK", "GREETING", 9, "greeting", "IDLE");
        log.transition("IDLE", "WARM_UP", "greeting_received");

        let raw = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);

        for line in &lines {
            let value: Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["service"], "orchestrator");
            assert_eq!(value["session_id"], log.session_id());
        }

        let decision: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(decision["category"], "BRAIN");
        assert_eq!(decision["data"]["priority"], 9);
    }

    #[test]
    fn long_comment_text_is_previewed() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new("orchestrator", dir.path());

        log.comment("user", &"rất dài ".repeat(20), "chitchat");

        let raw = fs::read_to_string(log.path()).unwrap();
        let value: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        let message = value["message"].as_str().unwrap();
        assert!(message.ends_with("...\""));
    }

    #[test]
    fn unwritable_directory_degrades_to_console_only() {
        let log = SessionLog::new("orchestrator", Path::new("/dev/null/not-a-dir"));
        // Must not panic
        log.decision("SKIP", "SPAM", 0, "spam", "IDLE");
    }
}
