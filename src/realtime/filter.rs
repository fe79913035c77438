//! Subscriber filters.
//!
//! A filter has one flag per event category plus optional predicates. Empty
//! allow-lists and unset thresholds mean "no constraint".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::requests::RequestTrace;
use crate::tracking::{TaskTrace, TraceStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionFilter {
    pub subscribe_tasks: bool,
    pub subscribe_requests: bool,
    pub subscribe_stats: bool,
    pub subscribe_system: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_status: Vec<TraceStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub request_methods: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status_codes: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_cpu_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_memory_usage: Option<u64>,
}

/// Partial filter sent with a `subscribe` message. Present fields replace the current ones.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterPatch {
    pub subscribe_tasks: Option<bool>,
    pub subscribe_requests: Option<bool>,
    pub subscribe_stats: Option<bool>,
    pub subscribe_system: Option<bool>,
    pub task_status: Option<Vec<TraceStatus>>,
    pub request_methods: Option<Vec<String>>,
    pub status_codes: Option<Vec<u16>>,
    pub user_ids: Option<Vec<String>>,
    pub tags: Option<BTreeMap<String, String>>,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub min_cpu_usage: Option<f64>,
    pub min_memory_usage: Option<u64>,
}

impl SubscriptionFilter {
    /// Everything, no predicates.
    pub fn all() -> Self {
        Self {
            subscribe_tasks: true,
            subscribe_requests: true,
            subscribe_stats: true,
            subscribe_system: true,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, patch: FilterPatch) {
        let FilterPatch {
            subscribe_tasks,
            subscribe_requests,
            subscribe_stats,
            subscribe_system,
            task_status,
            request_methods,
            status_codes,
            user_ids,
            tags,
            min_duration_ms,
            max_duration_ms,
            min_cpu_usage,
            min_memory_usage,
        } = patch;

        self.subscribe_tasks = subscribe_tasks.unwrap_or(self.subscribe_tasks);
        self.subscribe_requests = subscribe_requests.unwrap_or(self.subscribe_requests);
        self.subscribe_stats = subscribe_stats.unwrap_or(self.subscribe_stats);
        self.subscribe_system = subscribe_system.unwrap_or(self.subscribe_system);
        if let Some(task_status) = task_status {
            self.task_status = task_status;
        }
        if let Some(request_methods) = request_methods {
            self.request_methods = request_methods;
        }
        if let Some(status_codes) = status_codes {
            self.status_codes = status_codes;
        }
        if let Some(user_ids) = user_ids {
            self.user_ids = user_ids;
        }
        if let Some(tags) = tags {
            self.tags = tags;
        }
        self.min_duration_ms = min_duration_ms.or(self.min_duration_ms);
        self.max_duration_ms = max_duration_ms.or(self.max_duration_ms);
        self.min_cpu_usage = min_cpu_usage.or(self.min_cpu_usage);
        self.min_memory_usage = min_memory_usage.or(self.min_memory_usage);
    }

    /// Category subscribed and every task predicate satisfied.
    pub fn matches_task(&self, trace: &TaskTrace) -> bool {
        if !self.subscribe_tasks {
            return false;
        }
        if !self.task_status.is_empty() && !self.task_status.contains(&trace.status) {
            return false;
        }
        if !self
            .tags
            .iter()
            .all(|(key, value)| trace.tags.get(key) == Some(value))
        {
            return false;
        }
        if let Some(min) = self.min_cpu_usage {
            if trace.cpu_usage < min {
                return false;
            }
        }
        if let Some(min) = self.min_memory_usage {
            if trace.memory_usage < min {
                return false;
            }
        }
        if let Some(duration) = trace.duration_ms() {
            if !self.duration_in_range(duration) {
                return false;
            }
        }
        true
    }

    /// Category subscribed and every request predicate satisfied.
    pub fn matches_request(&self, trace: &RequestTrace) -> bool {
        if !self.subscribe_requests {
            return false;
        }
        if !self.request_methods.is_empty()
            && !self
                .request_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&trace.method))
        {
            return false;
        }
        if !self.status_codes.is_empty()
            && !trace
                .status_code
                .is_some_and(|code| self.status_codes.contains(&code))
        {
            return false;
        }
        if !self.user_ids.is_empty() && !self.user_ids.contains(&trace.user_id) {
            return false;
        }
        self.duration_in_range(trace.duration_ms)
    }

    fn duration_in_range(&self, duration_ms: u64) -> bool {
        self.min_duration_ms.map_or(true, |min| duration_ms >= min)
            && self.max_duration_ms.map_or(true, |max| duration_ms <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{Outcome, SessionLogger, TaskRecord, TaskSpec};

    fn finished_task(outcome: Outcome) -> TaskTrace {
        let record = TaskRecord::new(
            "t".into(),
            TaskSpec::new("job").tag("env", "prod"),
            String::new(),
            SessionLogger::new("t"),
        );
        record.finish(outcome);
        record.snapshot()
    }

    #[test]
    fn test_failed_only_filter() {
        let mut filter = SubscriptionFilter::default();
        filter.merge(FilterPatch {
            subscribe_tasks: Some(true),
            task_status: Some(vec![TraceStatus::Failed]),
            ..FilterPatch::default()
        });

        let failed = finished_task(Outcome::Failure {
            message: "x".into(),
            stack: String::new(),
        });
        let completed = finished_task(Outcome::Success);
        assert!(filter.matches_task(&failed));
        assert!(!filter.matches_task(&completed));
    }

    #[test]
    fn test_unsubscribed_category_never_matches() {
        let filter = SubscriptionFilter::default();
        assert!(!filter.matches_task(&finished_task(Outcome::Success)));

        let request = RequestTrace::new("r", "GET", "/", "::1", "");
        assert!(!filter.matches_request(&request));
        assert!(SubscriptionFilter::all().matches_request(&request));
    }

    #[test]
    fn test_tag_filter() {
        let mut filter = SubscriptionFilter::all();
        filter.tags.insert("env".into(), "prod".into());
        assert!(filter.matches_task(&finished_task(Outcome::Success)));

        filter.tags.insert("env".into(), "dev".into());
        assert!(!filter.matches_task(&finished_task(Outcome::Success)));
    }

    #[test]
    fn test_request_predicates() {
        let mut request = RequestTrace::new("r", "post", "/pay", "::1", "");
        request.status_code = Some(500);
        request.user_id = "u1".into();
        request.duration_ms = 120;

        let mut filter = SubscriptionFilter::all();
        filter.request_methods = vec!["POST".into()];
        filter.status_codes = vec![500, 502];
        filter.user_ids = vec!["u1".into()];
        filter.min_duration_ms = Some(100);
        assert!(filter.matches_request(&request));

        filter.max_duration_ms = Some(110);
        assert!(!filter.matches_request(&request));

        filter.max_duration_ms = None;
        request.status_code = None;
        assert!(!filter.matches_request(&request));
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut filter = SubscriptionFilter::all();
        filter.user_ids = vec!["u1".into()];
        filter.merge(FilterPatch {
            subscribe_stats: Some(false),
            ..FilterPatch::default()
        });
        assert!(!filter.subscribe_stats);
        assert!(filter.subscribe_tasks);
        assert_eq!(filter.user_ids, vec!["u1".to_string()]);
    }
}
