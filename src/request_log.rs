//! Request logging system for debugging and troubleshooting.
//!
//! Captures detailed logs for each pipeline run including:
//! - Request metadata (timestamp, mode, provider, model)
//! - Input and final output text
//! - API request/response payloads (binary content redacted)
//! - Timing information
//! - Errors if any

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Default number of request logs to keep
const DEFAULT_MAX_LOGS: usize = 10;

/// Hard cap for request logs kept in memory, whatever the retention mode.
const HARD_MAX_LOGS: usize = 1000;

/// In-flight records older than this belong to runs whose future was dropped.
/// Every pipeline call finishes well inside this window, retries included.
const STALE_IN_FLIGHT_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestLogsRetentionMode {
    Amount,
    Time,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestLogsRetentionConfig {
    pub mode: RequestLogsRetentionMode,
    /// Only used when mode == Amount.
    pub amount: usize,
    /// Only used when mode == Time.
    /// None means keep forever (time-based retention disabled).
    pub time_retention: Option<ChronoDuration>,
}

impl Default for RequestLogsRetentionConfig {
    fn default() -> Self {
        Self {
            mode: RequestLogsRetentionMode::Amount,
            amount: DEFAULT_MAX_LOGS,
            time_retention: Some(ChronoDuration::days(7)),
        }
    }
}

/// A single log entry within a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<String>,
}

/// Log level for entries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A complete request log containing all entries for a single pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "ended_at")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Pipeline mode id (e.g. "strict-transcript")
    pub mode: String,
    pub llm_provider: String,
    pub llm_model: Option<String>,
    /// STT provider, when the run started from audio
    pub stt_provider: Option<String>,
    /// OCR provider, when the run started from an image
    pub ocr_provider: Option<String>,
    /// Input text as received (transcript, OCR markdown, document or chat message)
    pub input_text: Option<String>,
    /// Text returned to the caller
    #[serde(rename = "final_text")]
    pub output_text: Option<String>,
    /// Whether the incomplete-prescription banner was appended
    pub banner_appended: bool,

    /// Payload sent to the LLM provider, with image data redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_request_json: Option<JsonValue>,
    /// JSON response received from the LLM provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_response_json: Option<JsonValue>,
    pub status: RequestStatus,
    /// Boundary error kind, if the run failed
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub entries: Vec<LogEntry>,
    pub total_duration_ms: Option<u64>,
    pub stt_duration_ms: Option<u64>,
    pub ocr_duration_ms: Option<u64>,
    pub llm_duration_ms: Option<u64>,
}

/// Status of a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    InProgress,
    Success,
    /// Input was rejected locally and guidance text returned
    Guidance,
    Error,
    Cancelled,
}

impl RequestLog {
    pub fn new(mode: String, llm_provider: String, llm_model: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            mode,
            llm_provider,
            llm_model,
            stt_provider: None,
            ocr_provider: None,
            input_text: None,
            output_text: None,
            banner_appended: false,
            llm_request_json: None,
            llm_response_json: None,
            status: RequestStatus::InProgress,
            error_kind: None,
            error_message: None,
            entries: Vec::new(),
            total_duration_ms: None,
            stt_duration_ms: None,
            ocr_duration_ms: None,
            llm_duration_ms: None,
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, details: Option<String>) {
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details,
        });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    pub fn info_with_details(&mut self, message: impl Into<String>, details: impl Into<String>) {
        self.log(LogLevel::Info, message, Some(details.into()));
    }

    fn finish(&mut self, status: RequestStatus) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.status = status;
        self.total_duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }

    pub fn complete_success(&mut self) {
        self.finish(RequestStatus::Success);
    }

    /// Mark request as answered locally with guidance text
    pub fn complete_guidance(&mut self, kind: impl Into<String>) {
        self.error_kind = Some(kind.into());
        self.finish(RequestStatus::Guidance);
    }

    pub fn complete_error(&mut self, kind: impl Into<String>, error: impl Into<String>) {
        self.error_kind = Some(kind.into());
        self.error_message = Some(error.into());
        self.finish(RequestStatus::Error);
    }

    pub fn complete_cancelled(&mut self) {
        self.finish(RequestStatus::Cancelled);
    }
}

/// Thread-safe request log store.
///
/// Runs in flight are keyed by request id so concurrent pipeline runs never
/// write into each other's record.
#[derive(Debug, Clone)]
pub struct RequestLogStore {
    logs: Arc<Mutex<VecDeque<RequestLog>>>,
    in_flight: Arc<Mutex<HashMap<String, RequestLog>>>,
    retention: Arc<Mutex<RequestLogsRetentionConfig>>,
}

impl Default for RequestLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLogStore {
    pub fn new() -> Self {
        Self::new_with_retention(RequestLogsRetentionConfig::default())
    }

    pub fn new_with_retention(retention: RequestLogsRetentionConfig) -> Self {
        let initial_capacity = match retention.mode {
            RequestLogsRetentionMode::Amount => retention.amount.clamp(1, HARD_MAX_LOGS),
            RequestLogsRetentionMode::Time => DEFAULT_MAX_LOGS,
        };

        Self {
            logs: Arc::new(Mutex::new(VecDeque::with_capacity(initial_capacity))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            retention: Arc::new(Mutex::new(retention)),
        }
    }

    pub fn retention(&self) -> RequestLogsRetentionConfig {
        *self.retention.lock().unwrap()
    }

    fn prune_locked(logs: &mut VecDeque<RequestLog>, cfg: RequestLogsRetentionConfig) {
        if cfg.mode == RequestLogsRetentionMode::Time {
            if let Some(retention) = cfg.time_retention {
                let cutoff = Utc::now() - retention;
                logs.retain(|l| l.started_at >= cutoff);
            }
        }

        if cfg.mode == RequestLogsRetentionMode::Amount {
            let target = cfg.amount.max(1);
            while logs.len() > target {
                logs.pop_front();
            }
        }

        while logs.len() > HARD_MAX_LOGS {
            logs.pop_front();
        }
    }

    pub fn prune(&self) {
        self.sweep_stale(ChronoDuration::minutes(STALE_IN_FLIGHT_MINUTES));
        let cfg = self.retention();
        let mut logs = self.logs.lock().unwrap();
        Self::prune_locked(&mut logs, cfg);
    }

    /// Move in-flight records older than `max_age` to the completed logs as cancelled.
    pub fn sweep_stale(&self, max_age: ChronoDuration) {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<RequestLog> = {
            let mut in_flight = self.in_flight.lock().unwrap();
            let ids: Vec<String> = in_flight
                .values()
                .filter(|log| log.started_at < cutoff)
                .map(|log| log.id.clone())
                .collect();
            ids.iter().filter_map(|id| in_flight.remove(id)).collect()
        };

        for mut record in stale {
            log::warn!("Request log {} abandoned in flight, marking cancelled", record.id);
            record.warn("Run never finished; record swept as abandoned");
            record.complete_cancelled();
            self.store_log(record);
        }
    }

    /// Start a new request log and return its id
    pub fn start_request(&self, mode: &str, llm_provider: &str, llm_model: Option<String>) -> String {
        let log = RequestLog::new(mode.to_string(), llm_provider.to_string(), llm_model);
        let id = log.id.clone();
        self.in_flight.lock().unwrap().insert(id.clone(), log);
        id
    }

    /// Modify an in-flight request log
    pub fn with_request<F, R>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut RequestLog) -> R,
    {
        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.get_mut(id).map(f)
    }

    /// Move a request from in-flight to the completed logs.
    ///
    /// A request still marked in progress is recorded as cancelled.
    pub fn complete_request(&self, id: &str) {
        let log = self.in_flight.lock().unwrap().remove(id);
        if let Some(mut log) = log {
            if log.status == RequestStatus::InProgress {
                log.complete_cancelled();
            }
            self.store_log(log);
        }
    }

    fn store_log(&self, log: RequestLog) {
        let cfg = self.retention();
        let mut logs = self.logs.lock().unwrap();
        logs.push_back(log);
        Self::prune_locked(&mut logs, cfg);
    }

    /// Look up a request log by id, in flight or completed
    pub fn get(&self, id: &str) -> Option<RequestLog> {
        if let Some(log) = self.in_flight.lock().unwrap().get(id) {
            return Some(log.clone());
        }
        self.logs.lock().unwrap().iter().find(|l| l.id == id).cloned()
    }

    /// Get all stored logs (most recent first)
    pub fn get_logs(&self, limit: Option<usize>) -> Vec<RequestLog> {
        self.prune();

        let mut result: Vec<RequestLog> = self.logs.lock().unwrap().iter().cloned().collect();
        result.extend(self.in_flight.lock().unwrap().values().cloned());
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        if let Some(limit) = limit {
            result.truncate(limit);
        }

        result
    }
}
