mod avatar;
mod card;
mod config;
mod download;
mod http;
mod sources;
mod state;
mod storage;
mod thumbnails;
mod transform;

use crate::config::Config;
use crate::download::ContentDownloader;
use crate::state::AppState;
use axum::Router;
use axum::body::HttpBody;
use axum::extract::DefaultBodyLimit;
use axum::http::{Response, header};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::{
    CompressionLayer,
    predicate::{DefaultPredicate, Predicate},
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::info;

#[derive(Clone)]
struct NoImageCompression {
    inner: DefaultPredicate,
}

impl NoImageCompression {
    fn new() -> Self {
        Self {
            inner: DefaultPredicate::new(),
        }
    }
}

impl Predicate for NoImageCompression {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: HttpBody,
    {
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            if let Ok(content_type) = content_type.to_str() {
                if content_type.starts_with("image/") {
                    return false;
                }
            }
        }
        self.inner.should_compress(response)
    }
}

fn build_app(state: Arc<AppState>) -> Router {
    let max_in_flight = if state.config.max_in_flight_requests == 0 {
        usize::MAX
    } else {
        state.config.max_in_flight_requests
    };
    let max_upload_bytes = state.config.max_upload_bytes;
    http::router(state)
        .layer(CompressionLayer::new().compress_when(NoImageCompression::new()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false)),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(
        characters_dir = %config.characters_dir.display(),
        avatar_width = config.avatar_width,
        avatar_height = config.avatar_height,
        whitelist_hosts = config.whitelist_hosts.len(),
        max_upload_bytes = config.max_upload_bytes,
        "startup config summary"
    );
    storage::ensure_dirs(&config)?;

    let config = Arc::new(config);
    let downloader = ContentDownloader::new(config.clone())?;
    let state = Arc::new(AppState::new(config, downloader));
    let app = build_app(state.clone());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "cardgate listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn app_routes_probe_and_rejects_strangers() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            characters_dir: root.join("characters"),
            thumbnails_dir: root.join("thumbnails"),
            uploads_dir: root.join("uploads"),
            avatar_width: 400,
            avatar_height: 600,
            max_decoded_pixels: 64_000_000,
            max_download_bytes: 8 * 1024 * 1024,
            max_upload_bytes: 1024 * 1024,
            max_in_flight_requests: 8,
            download_timeout: Duration::from_secs(5),
            whitelist_hosts: Vec::new(),
            chub_api_base: "http://127.0.0.1:1".to_string(),
            janny_api_base: "http://127.0.0.1:1".to_string(),
            pygmalion_api_base: "http://127.0.0.1:1".to_string(),
            aicc_api_base: "http://127.0.0.1:1".to_string(),
            risu_api_base: "http://127.0.0.1:1".to_string(),
        };
        storage::ensure_dirs(&config).unwrap();
        let config = Arc::new(config);
        let downloader = ContentDownloader::new(config.clone()).unwrap();
        let state = Arc::new(AppState::new(config, downloader));
        let app = build_app(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/probe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::builder().uri("/nothing-here").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
