//! Query surface handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::hub::{MonitorHub, MonitorStats, MonitoringInfo};
use crate::realtime::SubscriberInfo;
use crate::requests::{RequestSearchQuery, RequestSummary, RequestTrace, SearchOutcome};
use crate::tracking::{TaskTrace, TraceStatus};

/// Recent history rows included in `/requests` when no limit is given.
const RECENT_REQUESTS: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct TaskListParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

pub async fn list_tasks(
    State(hub): State<Arc<MonitorHub>>,
    Query(params): Query<TaskListParams>,
) -> Json<Vec<TaskTrace>> {
    let tasks = match params.kind.as_deref() {
        Some("active") => hub.get_active_tasks(),
        Some("history") => hub.get_history_tasks(None),
        _ => hub.get_all_traces(),
    };
    Json(tasks)
}

pub async fn get_task(
    State(hub): State<Arc<MonitorHub>>,
    Path(id): Path<String>,
) -> Result<Json<TaskTrace>, StatusCode> {
    hub.get_task(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskHistoryParams {
    pub limit: Option<usize>,
    pub status: Option<TraceStatus>,
}

pub async fn task_history(
    State(hub): State<Arc<MonitorHub>>,
    Query(params): Query<TaskHistoryParams>,
) -> Json<Vec<TaskTrace>> {
    let mut tasks = hub.get_history_tasks(params.limit);
    if let Some(status) = params.status {
        tasks.retain(|t| t.status == status);
    }
    Json(tasks)
}

pub async fn active_tasks(State(hub): State<Arc<MonitorHub>>) -> Json<Vec<TaskTrace>> {
    Json(hub.get_active_tasks())
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestListParams {
    pub active: Option<bool>,
    pub history: Option<bool>,
    pub limit: Option<usize>,
}

pub async fn list_requests(
    State(hub): State<Arc<MonitorHub>>,
    Query(params): Query<RequestListParams>,
) -> Json<Vec<RequestSummary>> {
    let neither = params.active.is_none() && params.history.is_none();
    let mut traces = Vec::new();
    if neither || params.active == Some(true) {
        traces.extend(hub.get_active_requests());
    }
    if neither || params.history == Some(true) {
        traces.extend(hub.get_history_requests(Some(params.limit.unwrap_or(RECENT_REQUESTS))));
    }
    Json(newest_first(traces))
}

pub async fn get_request(
    State(hub): State<Arc<MonitorHub>>,
    Path(id): Path<String>,
) -> Result<Json<RequestTrace>, StatusCode> {
    hub.get_request(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestHistoryParams {
    pub limit: Option<usize>,
    pub method: Option<String>,
    pub status_code: Option<u16>,
    pub user_id: Option<String>,
}

pub async fn request_history(
    State(hub): State<Arc<MonitorHub>>,
    Query(params): Query<RequestHistoryParams>,
) -> Json<Vec<RequestSummary>> {
    let traces = hub
        .get_history_requests(params.limit)
        .into_iter()
        .filter(|t| {
            params
                .method
                .as_ref()
                .map_or(true, |m| m.eq_ignore_ascii_case(&t.method))
                && params.status_code.map_or(true, |c| t.status_code == Some(c))
                && params.user_id.as_ref().map_or(true, |u| *u == t.user_id)
        })
        .collect();
    Json(newest_first(traces))
}

pub async fn active_requests(State(hub): State<Arc<MonitorHub>>) -> Json<Vec<RequestSummary>> {
    Json(newest_first(hub.get_active_requests()))
}

pub async fn search_requests(
    State(hub): State<Arc<MonitorHub>>,
    Json(query): Json<RequestSearchQuery>,
) -> Json<SearchOutcome> {
    Json(hub.search_requests(&query).await)
}

pub async fn stats(State(hub): State<Arc<MonitorHub>>) -> Json<MonitorStats> {
    Json(hub.get_current_stats())
}

pub async fn reset_stats(State(hub): State<Arc<MonitorHub>>) -> StatusCode {
    hub.reset_task_stats();
    StatusCode::NO_CONTENT
}

pub async fn info(State(hub): State<Arc<MonitorHub>>) -> Json<MonitoringInfo> {
    Json(hub.monitoring_info())
}

pub async fn connections(State(hub): State<Arc<MonitorHub>>) -> Json<Vec<SubscriberInfo>> {
    Json(hub.subscribers().infos())
}

#[derive(Debug, Default, Deserialize)]
pub struct MonitorParams {
    pub include_tasks: Option<bool>,
    pub include_requests: Option<bool>,
    pub include_stats: Option<bool>,
    pub limit: Option<usize>,
}

/// Combined view served by `/monitor`.
#[derive(Debug, Default, Serialize)]
pub struct MonitorView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<MonitorStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_tasks: Option<Vec<TaskTrace>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_tasks: Option<Vec<TaskTrace>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_requests: Option<Vec<RequestSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_requests: Option<Vec<RequestSummary>>,
}

pub async fn monitor(
    State(hub): State<Arc<MonitorHub>>,
    Query(params): Query<MonitorParams>,
) -> Json<MonitorView> {
    let all = params.include_tasks.is_none()
        && params.include_requests.is_none()
        && params.include_stats.is_none();
    let wants = |flag: Option<bool>| all || flag == Some(true);

    let mut view = MonitorView::default();
    if wants(params.include_stats) {
        view.stats = Some(hub.get_current_stats());
    }
    if wants(params.include_tasks) {
        view.active_tasks = Some(hub.get_active_tasks());
        view.recent_tasks = Some(hub.get_history_tasks(params.limit));
    }
    if wants(params.include_requests) {
        view.active_requests = Some(newest_first(hub.get_active_requests()));
        view.recent_requests = Some(newest_first(hub.get_history_requests(params.limit)));
    }
    Json(view)
}

fn newest_first(mut traces: Vec<RequestTrace>) -> Vec<RequestSummary> {
    traces.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    traces.iter().map(RequestTrace::summary).collect()
}
