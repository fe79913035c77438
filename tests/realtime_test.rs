//! Push protocol tests over a real websocket.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use monitor_hub::config::HubConfig;

mod common;

use common::{client, start_server};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn send_json(ws: &mut Socket, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next application envelope, skipping control frames.
async fn next_envelope(ws: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        if frame.is_text() {
            return serde_json::from_str(frame.to_text().unwrap()).unwrap();
        }
    }
}

/// Round-trip a ping so every earlier control message has been applied.
async fn sync(ws: &mut Socket) {
    send_json(ws, json!({ "type": "ping" })).await;
    let reply = next_envelope(ws).await;
    assert_eq!(reply["type"], "pong");
}

#[tokio::test]
async fn test_failed_only_subscription() {
    let server = start_server(HubConfig::default()).await;
    let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();

    send_json(
        &mut ws,
        json!({
            "type": "subscribe",
            "data": { "subscribe_tasks": true, "task_status": ["failed"] }
        }),
    )
    .await;
    sync(&mut ws).await;

    let supervisor = server.hub.supervisor();
    supervisor.run("fine", |_| async {}).await;
    supervisor.run("broken", |_| async { panic!("boom") }).await;

    let update = next_envelope(&mut ws).await;
    assert_eq!(update["type"], "task_update");
    assert_eq!(update["data"]["name"], "broken");
    assert_eq!(update["data"]["status"], "failed");
    assert!(update["data"]["error"].as_str().unwrap().contains("boom"));

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_get_stats_and_malformed_messages() {
    let server = start_server(HubConfig::default()).await;
    let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();

    ws.send(Message::text("definitely not json")).await.unwrap();
    send_json(&mut ws, json!({ "type": "launch_rockets" })).await;
    sync(&mut ws).await;

    send_json(&mut ws, json!({ "type": "get_stats" })).await;
    let stats = next_envelope(&mut ws).await;
    assert_eq!(stats["type"], "stats_update");
    assert_eq!(stats["data"]["task_stats"]["total_started"], 0);
    assert!(stats["timestamp"].as_u64().unwrap() > 0);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_request_updates_are_pushed() {
    let server = start_server(HubConfig::default()).await;
    let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();

    send_json(
        &mut ws,
        json!({
            "type": "subscribe",
            "data": { "subscribe_requests": true, "status_codes": [500] }
        }),
    )
    .await;
    sync(&mut ws).await;

    let http = client();
    http.get(server.app_url("/hello")).send().await.unwrap();
    http.get(server.app_url("/broken")).send().await.unwrap();

    let update = next_envelope(&mut ws).await;
    assert_eq!(update["type"], "request_update");
    assert_eq!(update["data"]["url"], "/broken");
    assert_eq!(update["data"]["status"], "failed");

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_connections_track_subscribers() {
    let server = start_server(HubConfig::default()).await;
    let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();
    sync(&mut ws).await;

    let connections: Vec<Value> = client()
        .get(server.debug_url("/connections"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0]["filter"]["subscribe_tasks"], false);

    ws.close(None).await.unwrap();
    for _ in 0..50 {
        if server.hub.subscribers().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(server.hub.subscribers().is_empty());

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_shutdown_closes_subscribers() {
    let server = start_server(HubConfig::default()).await;
    let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();
    sync(&mut ws).await;

    server.shutdown.trigger();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_realtime_disabled_rejects_upgrade() {
    let mut config = HubConfig::default();
    config.monitor.enable_realtime = false;
    let server = start_server(config).await;

    assert!(connect_async(server.ws_url()).await.is_err());

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_idle_connection_receives_keepalive_ping() {
    let mut config = HubConfig::default();
    config.realtime.keepalive_interval_secs = 1;
    config.realtime.idle_timeout_secs = 5;
    let server = start_server(config).await;
    let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();

    let pinged = tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(frame) = ws.next().await {
            if frame.unwrap().is_ping() {
                return true;
            }
        }
        false
    })
    .await;
    assert!(matches!(pinged, Ok(true)));

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_silent_connection_is_dropped_after_idle_timeout() {
    let mut config = HubConfig::default();
    config.realtime.keepalive_interval_secs = 1;
    config.realtime.idle_timeout_secs = 2;
    let server = start_server(config).await;
    // never read, so no pong ever goes back to the server
    let (_ws, _) = connect_async(server.ws_url()).await.unwrap();

    for _ in 0..20 {
        if !server.hub.subscribers().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.hub.subscribers().len(), 1);

    for _ in 0..100 {
        if server.hub.subscribers().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(server.hub.subscribers().is_empty());

    server.shutdown.trigger();
}
