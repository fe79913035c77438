//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{http::StatusCode, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use monitor_hub::config::HubConfig;
use monitor_hub::hub::MonitorHub;
use monitor_hub::lifecycle::Shutdown;
use monitor_hub::MonitorServer;

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<MonitorHub>,
    pub shutdown: Shutdown,
}

impl TestServer {
    /// URL under the monitoring prefix.
    pub fn debug_url(&self, path: &str) -> String {
        format!("http://{}/debug{}", self.addr, path)
    }

    pub fn app_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/debug/ws", self.addr)
    }
}

/// Application routes served next to the monitoring surface.
pub fn demo_app() -> Router {
    Router::new()
        .route("/hello", get(|| async { "hello" }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "broken") }),
        )
}

/// Boot a monitor server on an ephemeral port.
pub async fn start_server(mut config: HubConfig) -> TestServer {
    config.server.bind_address = "127.0.0.1:0".into();
    let hub = MonitorHub::init(&config).unwrap();
    let listener = TcpListener::bind(&config.server.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = MonitorServer::new(&config, hub.clone()).with_app(demo_app());
    let signal = {
        let shutdown = shutdown.clone();
        async move { shutdown.wait().await }
    };
    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });

    TestServer {
        addr,
        hub,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// Every connection gets the `(status, json body)` produced by `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                read_request(&mut socket).await;

                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Consume one HTTP/1.1 request (headers plus `Content-Length` body).
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&data[..header_end]).to_ascii_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= header_end + 4 + content_length {
            return;
        }
    }
}
