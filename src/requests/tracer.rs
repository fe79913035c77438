//! Request lifecycle on the hub: register, update, report, finalize.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::hub::MonitorHub;
use crate::observability::metrics;
use crate::requests::trace::{parse_latency_ms, RequestTrace, RequestUpdate};
use crate::tracking::TraceStatus;

/// Report key whose presence marks a request as finished.
const TERMINAL_KEY: &str = "resp_status_code";

impl MonitorHub {
    /// Open an active trace for an inbound request.
    ///
    /// Registering an id that is already active returns the existing trace unchanged.
    pub fn register_request(
        &self,
        request_id: &str,
        method: &str,
        url: &str,
        client_addr: &str,
        user_agent: &str,
    ) -> RequestTrace {
        let trace = RequestTrace::new(request_id, method, url, client_addr, user_agent);
        let key = trace.request_id.clone();

        if !self
            .active_requests
            .put_if_absent(key.clone(), Arc::new(Mutex::new(trace.clone())))
        {
            debug!(request_id = %key, "Request already registered");
            return self
                .active_requests
                .get(&key)
                .map(|existing| existing.lock().clone())
                .unwrap_or(trace);
        }

        self.stats().request_started(true);
        metrics::record_request_started(self.active_requests.len());
        debug!(request_id = %key, method, url, "Request started");
        self.broadcast_request_update(&trace);
        trace
    }

    /// Apply `update` to an active request and finalize it.
    ///
    /// Returns the terminal trace, or `None` when the id is not active.
    pub fn update_request(&self, request_id: &str, update: RequestUpdate) -> Option<RequestTrace> {
        let key = request_id.to_string();
        let Some(entry) = self.active_requests.get(&key) else {
            debug!(request_id, "Update for unknown request ignored");
            return None;
        };
        entry.lock().apply_update(&update);
        self.finalize_request(&key, None)
    }

    /// Ingest a flat key/value report from a middleware hook.
    ///
    /// Active ids are updated in place and finalized once `resp_status_code` is present.
    /// Unknown ids are synthesized from the report, straight into history when already
    /// terminal. Reports for ids already in history are dropped.
    pub fn handle_report(
        &self,
        request_id: &str,
        report: &HashMap<String, String>,
    ) -> Option<RequestTrace> {
        let key = request_id.to_string();
        let terminal = report
            .get(TERMINAL_KEY)
            .is_some_and(|code| !code.trim().is_empty());

        if let Some(entry) = self.active_requests.get(&key) {
            let snapshot = {
                let mut trace = entry.lock();
                trace.apply_report(report);
                trace.clone()
            };
            if terminal {
                return self.finalize_request(&key, None);
            }
            self.broadcast_request_update(&snapshot);
            return Some(snapshot);
        }

        if self.request_index.contains(&key) {
            debug!(request_id, "Report for an already recorded request dropped");
            return None;
        }

        let mut trace = RequestTrace::from_report(request_id, report);
        if terminal {
            let hint = report.get("latency").and_then(|l| parse_latency_ms(l));
            trace.finalize(hint);
            return self.record_finished_request(trace, false);
        }

        if !self
            .active_requests
            .put_if_absent(key, Arc::new(Mutex::new(trace.clone())))
        {
            // registered concurrently; apply to that entry instead
            return self.handle_report(request_id, report);
        }
        self.stats().request_started(true);
        metrics::record_request_started(self.active_requests.len());
        self.broadcast_request_update(&trace);
        Some(trace)
    }

    /// Claim an active request, stamp it terminal and move it to history.
    ///
    /// Removal from the active map is the claim, so concurrent finalizers record it once.
    fn finalize_request(&self, key: &String, duration_hint: Option<u64>) -> Option<RequestTrace> {
        let entry = self.active_requests.delete(key)?;
        let trace = {
            let mut trace = entry.lock();
            trace.finalize(duration_hint);
            trace.clone()
        };
        self.record_finished_request(trace, true)
    }

    fn record_finished_request(&self, trace: RequestTrace, was_active: bool) -> Option<RequestTrace> {
        let stored = self.push_request_history(trace.clone());
        if !stored {
            debug!(request_id = %trace.request_id, "History already holds this request");
            if !was_active {
                return None;
            }
        }

        if !was_active {
            self.stats().request_started(false);
        }
        let failed = trace.status == TraceStatus::Failed;
        self.stats()
            .request_finished(failed, trace.duration_ms, was_active);
        metrics::record_request_finished(trace.status, trace.duration_ms, self.active_requests.len());
        debug!(
            request_id = %trace.request_id,
            status = %trace.status,
            status_code = trace.status_code.unwrap_or_default(),
            duration_ms = trace.duration_ms,
            "Request finished"
        );
        self.broadcast_request_update(&trace);
        Some(trace)
    }
}
