//! HTTP-редиректор: страница с переходом по deep-link схеме приложения.

use crate::link::build_app_link;
use axum::Router;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::sync::watch;

#[derive(Debug, Deserialize)]
pub struct RedirectParams {
    url: String,
    #[serde(default)]
    name: Option<String>,
}

pub fn router() -> Router {
    Router::new()
        .route("/redirect/{system}/{app}", get(redirect_to_app))
        .route("/health", get(health))
}

/// Поднимает редиректор на всех интерфейсах и работает до сигнала остановки.
pub async fn serve(port: u16, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Redirector listening");
    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    tracing::info!("Redirector stopped");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn redirect_to_app(
    Path((system, app)): Path<(String, String)>,
    Query(params): Query<RedirectParams>,
) -> Response {
    let name = params.name.as_deref().unwrap_or("");
    let Some(app_url) = build_app_link(&system, &app, &params.url, name) else {
        tracing::debug!(system = %system, app = %app, "Unknown redirect target");
        return (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "detail": "Invalid system or app" })),
        )
            .into_response();
    };
    Html(redirect_page(&app_url)).into_response()
}

fn redirect_page(app_url: &str) -> String {
    let target = escape_attr(app_url);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Перенаправление...</title>
    <meta http-equiv="refresh" content="0;url={target}">
</head>
<body>
    <p>Перенаправление на приложение...</p>
    <p>Если перенаправление не произошло автоматически, <a href="{target}">нажмите здесь</a></p>
</body>
</html>
"#
    )
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
