//! Axum hook that traces sampled requests through the hub.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::hub::MonitorHub;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// State for [`trace_requests`].
#[derive(Clone)]
pub struct TracingState {
    pub hub: Arc<MonitorHub>,
    /// Paths under this prefix are never traced.
    pub skip_prefix: String,
}

/// Register each sampled request, then report its response back to the hub.
pub async fn trace_requests(
    State(state): State<TracingState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if (!state.skip_prefix.is_empty() && path.starts_with(&state.skip_prefix))
        || !sampled(state.hub.config().sample_rate)
    {
        return next.run(req).await;
    }

    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();
    let user_agent = header_str(req.headers(), header::USER_AGENT);
    let is_websocket = header_str(req.headers(), header::UPGRADE).eq_ignore_ascii_case("websocket");

    state.hub.register_request(
        &request_id,
        req.method().as_str(),
        &req.uri().to_string(),
        &client_addr,
        &user_agent,
    );
    let mut in_flight = InFlight {
        hub: state.hub.clone(),
        request_id,
        started: Instant::now(),
        report: HashMap::from([("req_header".to_string(), render_headers(req.headers()))]),
        finished: false,
    };
    in_flight
        .report
        .insert("is_websocket".into(), is_websocket.to_string());

    let response = next.run(req).await;

    let status = response.status();
    in_flight
        .report
        .insert("resp_header".into(), render_headers(response.headers()));
    if status.is_server_error() {
        in_flight.report.insert("error".into(), status.to_string());
    }
    in_flight.finish(status.as_u16());

    response
}

/// A registered request whose response has not been reported yet.
///
/// Dropped unfinished when the handler panics or the request future is cancelled;
/// the trace is then closed as a server error so it never lingers in the active set.
struct InFlight {
    hub: Arc<MonitorHub>,
    request_id: String,
    started: Instant,
    report: HashMap<String, String>,
    finished: bool,
}

impl InFlight {
    fn finish(&mut self, status_code: u16) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.report
            .insert("resp_status_code".into(), status_code.to_string());
        self.report.insert(
            "latency".into(),
            format!("{}ms", self.started.elapsed().as_millis()),
        );
        self.hub.handle_report(&self.request_id, &self.report);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let error = if std::thread::panicking() {
            "handler panicked"
        } else {
            "request cancelled before completion"
        };
        warn!(request_id = %self.request_id, error, "Request ended without a response");
        self.report.insert("error".into(), error.to_string());
        self.finish(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
    }
}

fn sampled(rate: f64) -> bool {
    rate >= 1.0 || (rate > 0.0 && fastrand::f64() < rate)
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn render_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("<binary>")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use futures_util::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::config::{MonitorConfig, RealtimeConfig};
    use crate::tracking::TraceStatus;

    async fn boom() -> &'static str {
        panic!("kaboom")
    }

    async fn hang() -> &'static str {
        std::future::pending::<()>().await;
        "unreachable"
    }

    fn traced_app() -> (Arc<MonitorHub>, Router) {
        let hub = Arc::new(MonitorHub::new(MonitorConfig::default(), RealtimeConfig::default()));
        let state = TracingState {
            hub: hub.clone(),
            skip_prefix: "/debug".to_string(),
        };
        let router = Router::new()
            .route("/boom", get(boom))
            .route("/hang", get(hang))
            .layer(middleware::from_fn_with_state(state, trace_requests));
        (hub, router)
    }

    fn get_request(uri: &str, id: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(REQUEST_ID_HEADER, id)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_panicking_handler_closes_trace() {
        let (hub, router) = traced_app();

        let outcome = AssertUnwindSafe(router.oneshot(get_request("/boom", "boom-1")))
            .catch_unwind()
            .await;
        assert!(outcome.is_err());

        assert!(hub.get_active_requests().is_empty());
        let trace = hub.get_request("boom-1").unwrap();
        assert_eq!(trace.status, TraceStatus::Failed);
        assert_eq!(trace.status_code, Some(500));
        assert_eq!(trace.error, "handler panicked");

        let stats = hub.stats().request_stats();
        assert_eq!(stats.active_requests, 0);
        assert_eq!(stats.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_cancelled_request_closes_trace() {
        let (hub, router) = traced_app();

        let pending = router.oneshot(get_request("/hang", "hang-1"));
        assert!(tokio::time::timeout(Duration::from_millis(20), pending)
            .await
            .is_err());

        assert!(hub.get_active_requests().is_empty());
        let history = hub.get_history_requests(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].request_id, "hang-1");
        assert_eq!(history[0].error, "request cancelled before completion");
        assert_eq!(hub.stats().request_stats().active_requests, 0);
    }

    #[test]
    fn test_sampling_bounds() {
        assert!(sampled(1.0));
        assert!(!sampled(0.0));
        assert!((0..200).filter(|_| sampled(0.5)).count() > 0);
    }

    #[test]
    fn test_render_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(render_headers(&headers), "content-type: application/json");
    }
}
