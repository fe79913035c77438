//! Request trace model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tracking::{unix_millis, TraceStatus};

/// Ceiling for header, body and session-log fields.
pub const MAX_FIELD_SIZE: usize = 64 * 1024;

/// Ceiling for captured call stacks.
pub const MAX_CALL_STACK_SIZE: usize = 1024 * 1024;

/// Room kept at the end of a truncated field for the marker.
const TRUNCATION_RESERVE: usize = 64;

/// Cap `value` at `limit` bytes, appending a marker with the original size.
///
/// Cuts on a char boundary, so the result is always valid UTF-8.
pub fn limit_string(value: &str, limit: usize) -> String {
    if value.len() <= limit {
        return value.to_string();
    }

    let mut cut = limit.saturating_sub(TRUNCATION_RESERVE);
    while cut > 0 && !value.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... [TRUNCATED: original size {} bytes] ...",
        &value[..cut],
        value.len()
    )
}

/// Full lifecycle record of one inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTrace {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub client_addr: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub user_id: String,
    pub status: TraceStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status_code: Option<u16>,
    pub start_time: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub latency: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub error: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub req_header: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub req_body: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub resp_header: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub resp_body: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub session_logs: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub call_stack: String,
    #[serde(default)]
    pub is_websocket: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub task_ids: Vec<String>,
}

impl RequestTrace {
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        client_addr: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            url: url.into(),
            client_addr: client_addr.into(),
            user_agent: user_agent.into(),
            user_id: String::new(),
            status: TraceStatus::Active,
            status_code: None,
            start_time: unix_millis(),
            end_time: None,
            duration_ms: 0,
            latency: String::new(),
            error: String::new(),
            req_header: String::new(),
            req_body: String::new(),
            resp_header: String::new(),
            resp_body: String::new(),
            session_logs: String::new(),
            call_stack: String::new(),
            is_websocket: false,
            task_ids: Vec::new(),
        }
    }

    /// Build a trace from a middleware report map. Status stays `active`.
    pub fn from_report(request_id: &str, report: &HashMap<String, String>) -> Self {
        let field = |key: &str| report.get(key).cloned().unwrap_or_default();
        let mut trace = Self::new(
            request_id,
            field("req_method"),
            field("req_url"),
            field("ip"),
            field("user_agent"),
        );
        trace.apply_report(report);
        trace
    }

    /// Overlay the non-empty fields of a middleware report, truncating large text.
    pub fn apply_report(&mut self, report: &HashMap<String, String>) {
        for (key, value) in report {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "ip" => self.client_addr = value.clone(),
                "req_url" => self.url = value.clone(),
                "req_method" => self.method = value.clone(),
                "user_agent" => self.user_agent = value.clone(),
                "user_id" => self.user_id = value.clone(),
                "error" => self.error = limit_string(value, MAX_FIELD_SIZE),
                "latency" => self.latency = value.clone(),
                "req_header" => self.req_header = limit_string(value, MAX_FIELD_SIZE),
                "req_body" => self.req_body = limit_string(value, MAX_FIELD_SIZE),
                "resp_header" => self.resp_header = limit_string(value, MAX_FIELD_SIZE),
                "resp_body" => self.resp_body = limit_string(value, MAX_FIELD_SIZE),
                "session_logs" => self.session_logs = limit_string(value, MAX_FIELD_SIZE),
                "call_stack" => self.call_stack = limit_string(value, MAX_CALL_STACK_SIZE),
                "is_websocket" => self.is_websocket = value == "true",
                "resp_status_code" => self.status_code = value.trim().parse().ok(),
                _ => {}
            }
        }
    }

    pub fn apply_update(&mut self, update: &RequestUpdate) {
        if let Some(code) = update.status_code {
            self.status_code = Some(code);
        }
        if let Some(error) = &update.error {
            self.error = limit_string(error, MAX_FIELD_SIZE);
        }
        if let Some(user_id) = &update.user_id {
            self.user_id = user_id.clone();
        }
        if let Some(logs) = &update.session_logs {
            self.session_logs = limit_string(logs, MAX_FIELD_SIZE);
        }
        if let Some(task_ids) = &update.task_ids {
            self.task_ids.extend(task_ids.iter().cloned());
        }
    }

    /// Stamp end time, duration and terminal status.
    ///
    /// `duration_hint` (from a reported latency) is used when the trace was never timed here.
    pub fn finalize(&mut self, duration_hint: Option<u64>) {
        let now = unix_millis();
        self.end_time = Some(now);
        self.duration_ms = duration_hint.unwrap_or_else(|| now.saturating_sub(self.start_time));
        self.status = if self.error.is_empty() {
            TraceStatus::Completed
        } else {
            TraceStatus::Failed
        };
    }

    /// Re-apply the size ceilings to every large text field.
    pub fn limit_fields(&mut self) {
        for field in [
            &mut self.error,
            &mut self.req_header,
            &mut self.req_body,
            &mut self.resp_header,
            &mut self.resp_body,
            &mut self.session_logs,
        ] {
            if field.len() > MAX_FIELD_SIZE {
                *field = limit_string(field, MAX_FIELD_SIZE);
            }
        }
        if self.call_stack.len() > MAX_CALL_STACK_SIZE {
            self.call_stack = limit_string(&self.call_stack, MAX_CALL_STACK_SIZE);
        }
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            request_id: self.request_id.clone(),
            method: self.method.clone(),
            url: self.url.clone(),
            status: self.status,
            status_code: self.status_code,
            start_time: self.start_time,
            duration_ms: self.duration_ms,
            user_id: self.user_id.clone(),
            client_addr: self.client_addr.clone(),
            has_error: !self.error.is_empty(),
        }
    }
}

/// Partial update applied when a request finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestUpdate {
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub user_id: Option<String>,
    pub session_logs: Option<String>,
    pub task_ids: Option<Vec<String>>,
}

impl RequestUpdate {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn status_code(code: u16) -> Self {
        Self {
            status_code: Some(code),
            ..Self::default()
        }
    }
}

/// Compact listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub status: TraceStatus,
    pub status_code: Option<u16>,
    pub start_time: u64,
    pub duration_ms: u64,
    pub user_id: String,
    pub client_addr: String,
    pub has_error: bool,
}

/// Parse a reported latency such as `"12ms"`, `"1.5s"` or `"850µs"` into whole milliseconds.
pub fn parse_latency_ms(latency: &str) -> Option<u64> {
    let latency = latency.trim();
    let (number, scale) = if let Some(n) = latency.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = latency.strip_suffix("µs").or_else(|| latency.strip_suffix("us")) {
        (n, 0.001)
    } else if let Some(n) = latency.strip_suffix("ns") {
        (n, 0.000_001)
    } else if let Some(n) = latency.strip_suffix('s') {
        (n, 1000.0)
    } else {
        (latency, 1.0)
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * scale).round() as u64)
}
