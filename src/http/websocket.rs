//! Push endpoint: upgrades into the realtime protocol.

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::hub::MonitorHub;
use crate::realtime::connection::serve_socket;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<MonitorHub>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if !hub.config().enable_realtime {
        return (StatusCode::SERVICE_UNAVAILABLE, "Realtime updates are disabled").into_response();
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let max_message_bytes = hub.realtime_config().max_message_bytes;

    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| serve_socket(socket, hub, addr.to_string(), user_agent))
}
