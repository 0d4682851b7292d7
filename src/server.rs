//! Keep-alive HTTP stub.
//!
//! Free hosting platforms recycle idle containers; an HTTP endpoint that
//! an external pinger can poll keeps the process alive and doubles as a
//! health check.

use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Identity document served at `/`.
#[derive(Serialize, Deserialize)]
struct BotInfo {
    name: String,
    version: String,
}

/// Start the keep-alive server exposing `/` and `/healthz`.
pub async fn serve_http(
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = Router::new()
        .route("/", get(bot_info))
        .route("/healthz", get(healthz));
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

async fn bot_info() -> Json<BotInfo> {
    Json(BotInfo {
        name: "wikigram".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::task;

    #[tokio::test]
    async fn health_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/healthz", get(super::healthz));
        let server = axum::serve(listener, app.into_make_service());
        let handle = task::spawn(async move {
            server.await.unwrap();
        });

        let url = format!("http://{addr}/healthz");
        let body: Health = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body.status, "ok");
        handle.abort();
    }

    #[tokio::test]
    async fn info_endpoint_names_the_bot() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(super::bot_info));
        let server = axum::serve(listener, app.into_make_service());
        let handle = task::spawn(async move {
            server.await.unwrap();
        });

        let url = format!("http://{addr}/");
        let info: BotInfo = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(info.name, "wikigram");
        handle.abort();
    }

    #[tokio::test]
    async fn serve_http_runs_until_shutdown() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let handle = tokio::spawn(async move {
            super::serve_http(addr, shutdown).await.unwrap();
        });

        let url = format!("http://{addr}/healthz");
        let mut attempts = 0;
        let response = loop {
            match reqwest::get(&url).await {
                Ok(resp) => break resp,
                Err(err) => {
                    attempts += 1;
                    assert!(attempts < 50, "health endpoint never came up: {err:?}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        };
        assert!(response.status().is_success());
        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn serve_http_bind_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // The port is already taken, so binding must fail.
        assert!(super::serve_http(addr, std::future::pending())
            .await
            .is_err());
    }
}
