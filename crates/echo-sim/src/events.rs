use serde::Serialize;
use std::io::Write;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

/// RFC 3339 timestamp for JSONL events.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub devices: Vec<String>,
    pub format: String,
    pub namespace: String,
    pub retention_ms: u64,
    pub timestamp: String,
}

impl EventStarted {
    pub fn new(devices: Vec<String>, format: &str, namespace: &str, retention_ms: u64) -> Self {
        Self {
            event: "started",
            devices,
            format: format.to_string(),
            namespace: namespace.to_string(),
            retention_ms,
            timestamp: now_iso(),
        }
    }
}

// ── Round events ────────────────────────────────────────────────

/// One device's view after evaluating a round.
#[derive(Serialize)]
pub struct EventRound {
    pub event: &'static str,
    pub round: u32,
    pub device: String,
    /// Devices heard from within the retention window.
    pub neighbors: Vec<String>,
    /// Devices that reported this one as nearby last round.
    pub seen_by: Vec<String>,
    pub sent: usize,
    pub timestamp: String,
}

impl EventRound {
    pub fn new(
        round: u32,
        device: String,
        neighbors: Vec<String>,
        seen_by: Vec<String>,
        sent: usize,
    ) -> Self {
        Self {
            event: "round",
            round,
            device,
            neighbors,
            seen_by,
            sent,
            timestamp: now_iso(),
        }
    }
}

#[derive(Serialize)]
pub struct EventLeft {
    pub event: &'static str,
    pub round: u32,
    pub device: String,
    pub timestamp: String,
}

impl EventLeft {
    pub fn new(round: u32, device: String) -> Self {
        Self {
            event: "left",
            round,
            device,
            timestamp: now_iso(),
        }
    }
}

#[derive(Serialize)]
pub struct EventError {
    pub event: &'static str,
    pub device: String,
    pub error: String,
    pub timestamp: String,
}

impl EventError {
    pub fn new(device: String, error: &str) -> Self {
        Self {
            event: "error",
            device,
            error: error.to_string(),
            timestamp: now_iso(),
        }
    }
}

// ── Summary ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub rounds: u32,
    pub messages_sent: usize,
    pub errors: u32,
    pub duration_s: f64,
    pub timestamp: String,
}

impl EventSummary {
    pub fn new(rounds: u32, messages_sent: usize, errors: u32, duration_s: f64) -> Self {
        Self {
            event: "summary",
            rounds,
            messages_sent,
            errors,
            duration_s,
            timestamp: now_iso(),
        }
    }
}
