//! Request search over in-memory traces and an optional audit backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

use crate::config::AuditConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::hub::MonitorHub;
use crate::requests::trace::RequestTrace;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Search criteria. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSearchQuery {
    /// Inclusive lower bound on start time (unix ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    /// Inclusive upper bound on start time (unix ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Substring of the request URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "client_ip")]
    pub client_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
    /// `true` keeps only failed requests, `false` only clean ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_contains: Option<String>,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    pub include_audit_logs: bool,
}

impl RequestSearchQuery {
    pub fn matches(&self, trace: &RequestTrace) -> bool {
        if self.start_time.is_some_and(|t| trace.start_time < t) {
            return false;
        }
        if self.end_time.is_some_and(|t| trace.start_time > t) {
            return false;
        }
        if let Some(method) = &self.method {
            if !method.eq_ignore_ascii_case(&trace.method) {
                return false;
            }
        }
        if let Some(url) = &self.url {
            if !trace.url.contains(url.as_str()) {
                return false;
            }
        }
        if self.user_id.as_ref().is_some_and(|u| *u != trace.user_id) {
            return false;
        }
        if self
            .client_addr
            .as_ref()
            .is_some_and(|addr| *addr != trace.client_addr)
        {
            return false;
        }
        if self.status_code.is_some() && self.status_code != trace.status_code {
            return false;
        }
        if self.min_duration_ms.is_some_and(|min| trace.duration_ms < min) {
            return false;
        }
        if self.max_duration_ms.is_some_and(|max| trace.duration_ms > max) {
            return false;
        }
        if self
            .has_error
            .is_some_and(|wanted| wanted == trace.error.is_empty())
        {
            return false;
        }
        if let Some(needle) = &self.error_contains {
            if !trace.error.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }

    fn page(&self) -> usize {
        self.page.max(1)
    }

    fn page_size(&self) -> usize {
        match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }
}

/// One page of search results.
///
/// `audit_error` carries a backend failure next to the in-memory results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<RequestTrace>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audit_error: Option<String>,
}

/// Long-retention request store consulted by searches.
#[async_trait]
pub trait AuditBackend: Send + Sync {
    async fn search(&self, query: &RequestSearchQuery) -> MonitorResult<Vec<RequestTrace>>;
}

/// Audit backend reached over HTTP: the query is POSTed as JSON and a
/// JSON array of request traces is expected back.
pub struct HttpAuditBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAuditBackend {
    pub fn new(config: &AuditConfig) -> MonitorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl AuditBackend for HttpAuditBackend {
    async fn search(&self, query: &RequestSearchQuery) -> MonitorResult<Vec<RequestTrace>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(query)
            .send()
            .await?
            .error_for_status()?;

        let mut traces: Vec<RequestTrace> = response.json().await?;
        for trace in &mut traces {
            trace.limit_fields();
        }
        Ok(traces)
    }
}

impl MonitorHub {
    /// Search active requests, the recent history window and, when asked, the audit backend.
    ///
    /// Results are deduplicated by id, sorted newest first, then paginated.
    pub async fn search_requests(&self, query: &RequestSearchQuery) -> SearchOutcome {
        let mut seen = HashSet::new();
        let mut results: Vec<RequestTrace> = Vec::new();
        let mut keep = |trace: RequestTrace, results: &mut Vec<RequestTrace>| {
            if query.matches(&trace) && seen.insert(trace.request_id.clone()) {
                results.push(trace);
            }
        };

        for trace in self.get_active_requests() {
            keep(trace, &mut results);
        }
        for trace in self
            .request_history
            .get_recent(self.config().search_history_window)
            .into_iter()
            .rev()
        {
            keep(trace, &mut results);
        }

        let mut audit_error = None;
        if query.include_audit_logs {
            match self.audit.clone() {
                Some(backend) => match backend.search(query).await {
                    Ok(traces) => {
                        for trace in traces {
                            keep(trace, &mut results);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Audit search failed; returning in-memory results");
                        audit_error = Some(e.to_string());
                    }
                },
                None => audit_error = Some(MonitorError::AuditDisabled.to_string()),
            }
        }

        results.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        let total = results.len();
        let (page, page_size) = (query.page(), query.page_size());
        let results = results
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        SearchOutcome {
            results,
            total,
            page,
            page_size,
            audit_error,
        }
    }
}
