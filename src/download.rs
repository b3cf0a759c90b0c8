use crate::card;
use crate::config::Config;
use crate::sources::{self, ContentKind, ContentSource};
use crate::storage::sanitize_file_name;
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use mime::Mime;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const USER_AGENT: &str = "cardgate/0.4";

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub buffer: Bytes,
    pub file_name: String,
    pub file_type: Mime,
}

// Either the asset proper or a degraded stand-in (the Pygmalion export
// document when its avatar cannot be turned into a card).
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    Asset(DownloadedFile),
    FallbackDocument(DownloadedFile),
}

impl DownloadOutcome {
    pub fn into_file(self) -> DownloadedFile {
        match self {
            DownloadOutcome::Asset(file) | DownloadOutcome::FallbackDocument(file) => file,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, DownloadOutcome::FallbackDocument(_))
    }
}

#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub outcome: DownloadOutcome,
    pub kind: ContentKind,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no provider matches the requested source")]
    Unmatched,
    #[error("{provider} returned status {status}")]
    UpstreamStatus {
        provider: &'static str,
        status: StatusCode,
    },
    #[error("{provider} request failed")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned an unusable document: {detail}")]
    BadDocument {
        provider: &'static str,
        detail: &'static str,
    },
    #[error("download exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
}

#[derive(Debug, Deserialize)]
struct JannyResolution {
    status: Option<String>,
    #[serde(rename = "downloadUrl")]
    download_url: Option<String>,
}

#[derive(Clone)]
pub struct ContentDownloader {
    client: reqwest::Client,
    config: Arc<Config>,
}

impl ContentDownloader {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("build download client")?;
        Ok(Self { client, config })
    }

    pub async fn fetch_url(&self, url: &str) -> Result<FetchedContent> {
        let source = sources::classify_url(url, &self.config.whitelist_hosts)
            .ok_or(DownloadError::Unmatched)?;
        self.fetch(&source).await
    }

    pub async fn fetch_handle(&self, handle: &str) -> Result<FetchedContent> {
        let source = sources::classify_handle(handle);
        self.fetch(&source).await
    }

    async fn fetch(&self, source: &ContentSource) -> Result<FetchedContent> {
        info!(provider = source.provider(), kind = source.kind().as_str(), "downloading content");
        let kind = source.kind();
        let outcome = match source {
            ContentSource::Pygmalion { uuid } => self.download_pygmalion(uuid).await?,
            ContentSource::Janny { uuid } => {
                DownloadOutcome::Asset(self.download_janny(uuid).await?)
            }
            ContentSource::Risu { uuid } => DownloadOutcome::Asset(self.download_risu(uuid).await?),
            ContentSource::Aicc { path } => DownloadOutcome::Asset(self.download_aicc(path).await?),
            ContentSource::Chub { path, kind } => match kind {
                ContentKind::Character => {
                    DownloadOutcome::Asset(self.download_chub_character(path).await?)
                }
                ContentKind::Lorebook => {
                    DownloadOutcome::Asset(self.download_chub_lorebook(path).await?)
                }
            },
            ContentSource::Generic { url } => {
                DownloadOutcome::Asset(self.download_generic(url).await?)
            }
        };
        Ok(FetchedContent { outcome, kind })
    }

    async fn download_chub_character(&self, path: &str) -> Result<DownloadedFile> {
        let url = format!("{}/api/characters/download", self.config.chub_api_base);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "format": "tavern", "fullPath": path }))
            .send()
            .await
            .map_err(|source| DownloadError::Transport { provider: "chub", source })?;
        let response = check_status("chub", response)?;
        let file_name = header_file_name(&response)
            .unwrap_or_else(|| format!("{}.png", sanitize_file_name(path)));
        let file_type = response_mime(&response, mime::IMAGE_PNG);
        let buffer = self.read_capped("chub", response).await?;
        Ok(DownloadedFile { buffer, file_name, file_type })
    }

    async fn download_chub_lorebook(&self, path: &str) -> Result<DownloadedFile> {
        let url = format!("{}/api/lorebooks/download", self.config.chub_api_base);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "fullPath": path, "format": "SILLYTAVERN" }))
            .send()
            .await
            .map_err(|source| DownloadError::Transport { provider: "chub", source })?;
        let response = check_status("chub", response)?;
        let name = path.rsplit('/').next().unwrap_or(path);
        let file_name = format!("{}.json", sanitize_file_name(name));
        let file_type = response_mime(&response, mime::APPLICATION_JSON);
        let buffer = self.read_capped("chub", response).await?;
        Ok(DownloadedFile { buffer, file_name, file_type })
    }

    async fn download_janny(&self, uuid: &str) -> Result<DownloadedFile> {
        let url = format!("{}/api/v1/download", self.config.janny_api_base);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "characterId": uuid }))
            .send()
            .await
            .map_err(|source| DownloadError::Transport { provider: "janny", source })?;
        if response.status() == StatusCode::FORBIDDEN {
            // The resolve endpoint refuses data-center egress addresses.
            warn!(%uuid, "janny refused the resolve request");
        }
        let response = check_status("janny", response)?;
        let resolution: JannyResolution = response
            .json()
            .await
            .map_err(|source| DownloadError::Transport { provider: "janny", source })?;
        if resolution.status.as_deref() != Some("ok") {
            return Err(DownloadError::BadDocument {
                provider: "janny",
                detail: "resolution status is not ok",
            }
            .into());
        }
        let download_url = resolution
            .download_url
            .filter(|value| !value.is_empty())
            .ok_or(DownloadError::BadDocument {
                provider: "janny",
                detail: "resolution carries no download url",
            })?;
        let response = self.get("janny", &download_url).await?;
        let file_type = response_mime(&response, mime::IMAGE_PNG);
        let buffer = self.read_capped("janny", response).await?;
        Ok(DownloadedFile {
            buffer,
            file_name: format!("{}.png", sanitize_file_name(uuid)),
            file_type,
        })
    }

    async fn download_pygmalion(&self, uuid: &str) -> Result<DownloadOutcome> {
        let url = format!(
            "{}/api/export/character/{}/v2",
            self.config.pygmalion_api_base, uuid
        );
        let response = self.get("pygmalion", &url).await?;
        let body = self.read_capped("pygmalion", response).await?;
        let document: Value = serde_json::from_slice(&body).map_err(|_| {
            DownloadError::BadDocument {
                provider: "pygmalion",
                detail: "export is not json",
            }
        })?;
        let character = match document.get("character") {
            Some(value) if value.is_object() => value,
            _ => {
                return Err(DownloadError::BadDocument {
                    provider: "pygmalion",
                    detail: "export has no character object",
                }
                .into());
            }
        };
        match self.pygmalion_card(character, uuid).await {
            Ok(file) => Ok(DownloadOutcome::Asset(file)),
            Err(err) => {
                warn!(error = ?err, %uuid, "pygmalion avatar unavailable, returning the export document");
                Ok(DownloadOutcome::FallbackDocument(DownloadedFile {
                    buffer: body,
                    file_name: format!("{}.json", sanitize_file_name(uuid)),
                    file_type: mime::APPLICATION_JSON,
                }))
            }
        }
    }

    async fn pygmalion_card(&self, character: &Value, uuid: &str) -> Result<DownloadedFile> {
        let avatar_url = character
            .pointer("/data/avatar")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or(DownloadError::BadDocument {
                provider: "pygmalion",
                detail: "character has no avatar url",
            })?;
        let response = self.get("pygmalion", avatar_url).await?;
        let avatar = self.read_capped("pygmalion", response).await?;
        let metadata = serde_json::to_string(character).context("serialize character metadata")?;
        let card_bytes =
            card::embed_metadata(&avatar, &metadata).context("embed character metadata")?;
        Ok(DownloadedFile {
            buffer: Bytes::from(card_bytes),
            file_name: format!("{}.png", sanitize_file_name(uuid)),
            file_type: mime::IMAGE_PNG,
        })
    }

    async fn download_aicc(&self, path: &str) -> Result<DownloadedFile> {
        let url = format!(
            "{}/wp-json/pngapi/v1/image/{}",
            self.config.aicc_api_base, path
        );
        let response = self.get("aicc", &url).await?;
        let file_type = response_mime(&response, mime::IMAGE_PNG);
        let buffer = self.read_capped("aicc", response).await?;
        Ok(DownloadedFile {
            buffer,
            file_name: format!("{}.png", sanitize_file_name(path)),
            file_type,
        })
    }

    async fn download_risu(&self, uuid: &str) -> Result<DownloadedFile> {
        let url = format!(
            "{}/api/v1/download/png-v3/{}?non_commercial=true",
            self.config.risu_api_base, uuid
        );
        let response = self.get("risu", &url).await?;
        let buffer = self.read_capped("risu", response).await?;
        Ok(DownloadedFile {
            buffer,
            file_name: format!("{}.png", sanitize_file_name(uuid)),
            file_type: mime::IMAGE_PNG,
        })
    }

    async fn download_generic(&self, url: &str) -> Result<DownloadedFile> {
        let response = self.get("generic", url).await?;
        let file_name = final_segment_name(response.url());
        let file_type = response_mime(&response, mime::IMAGE_PNG);
        let buffer = self.read_capped("generic", response).await?;
        Ok(DownloadedFile { buffer, file_name, file_type })
    }

    async fn get(
        &self,
        provider: &'static str,
        url: &str,
    ) -> Result<reqwest::Response, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::Transport { provider, source })?;
        check_status(provider, response)
    }

    async fn read_capped(
        &self,
        provider: &'static str,
        mut response: reqwest::Response,
    ) -> Result<Bytes> {
        let limit = self.config.max_download_bytes;
        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return Err(DownloadError::TooLarge { limit }.into());
            }
        }
        let mut buffer = BytesMut::with_capacity(64 * 1024);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| DownloadError::Transport { provider, source })?
        {
            if buffer.len().saturating_add(chunk.len()) > limit {
                return Err(DownloadError::TooLarge { limit }.into());
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }
}

fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, DownloadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    warn!(provider, %status, "provider rejected the request");
    Err(DownloadError::UpstreamStatus { provider, status })
}

fn header_file_name(response: &reqwest::Response) -> Option<String> {
    let raw = response
        .headers()
        .get(header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    let (_, tail) = raw.split_once("filename=")?;
    let name = tail
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('"')
        .trim();
    if name.is_empty() {
        return None;
    }
    Some(sanitize_file_name(name))
}

fn response_mime(response: &reqwest::Response, fallback: Mime) -> Mime {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Mime>().ok())
        .unwrap_or(fallback)
}

fn final_segment_name(url: &reqwest::Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    sanitize_file_name(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::RawQuery;
    use axum::http::Response as HttpResponse;
    use axum::routing::{get, post};
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config(base: &str, whitelist: Vec<String>) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            characters_dir: PathBuf::from("unused"),
            thumbnails_dir: PathBuf::from("unused"),
            uploads_dir: PathBuf::from("unused"),
            avatar_width: 400,
            avatar_height: 600,
            max_decoded_pixels: 64_000_000,
            max_download_bytes: 8 * 1024 * 1024,
            max_upload_bytes: 1024 * 1024,
            max_in_flight_requests: 8,
            download_timeout: Duration::from_secs(5),
            whitelist_hosts: whitelist,
            chub_api_base: base.to_string(),
            janny_api_base: base.to_string(),
            pygmalion_api_base: base.to_string(),
            aicc_api_base: base.to_string(),
            risu_api_base: base.to_string(),
        }
    }

    fn downloader(config: Config) -> ContentDownloader {
        ContentDownloader::new(Arc::new(config)).unwrap()
    }

    async fn spawn_stub(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn sample_png() -> Vec<u8> {
        let image = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            3,
            3,
            image::Rgba([1, 2, 3, 255]),
        ));
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn unmatched_source_fails_before_any_network_io() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                "hit"
            }
        });
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let err = fetcher
            .fetch_url(&format!("http://{addr}/cards/a.png"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DownloadError>(),
            Some(DownloadError::Unmatched)
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generic_download_names_after_the_final_url() {
        let router = Router::new()
            .route(
                "/start",
                get(|| async {
                    HttpResponse::builder()
                        .status(StatusCode::TEMPORARY_REDIRECT)
                        .header(header::LOCATION, "/cards/real-card.png?cache=1")
                        .body(Body::empty())
                        .unwrap()
                }),
            )
            .route(
                "/cards/real-card.png",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "image/webp")],
                        Bytes::from_static(b"fake image bytes"),
                    )
                }),
            );
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(
            "http://unused.invalid",
            vec!["127.0.0.1".to_string()],
        ));

        let content = fetcher
            .fetch_url(&format!("http://{addr}/start"))
            .await
            .unwrap();
        assert_eq!(content.kind, ContentKind::Character);
        assert!(!content.outcome.is_fallback());
        let file = content.outcome.into_file();
        assert_eq!(file.file_name, "real-card.png");
        assert_eq!(file.file_type.essence_str(), "image/webp");
        assert_eq!(&file.buffer[..], b"fake image bytes");
    }

    #[tokio::test]
    async fn chub_character_posts_tavern_payload() {
        let router = Router::new().route(
            "/api/characters/download",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body, json!({"format": "tavern", "fullPath": "creator/adventurer"}));
                (
                    [
                        (header::CONTENT_TYPE, "image/png"),
                        (
                            header::CONTENT_DISPOSITION,
                            "attachment; filename=\"adventurer card.png\"",
                        ),
                    ],
                    Bytes::from_static(b"card png bytes"),
                )
            }),
        );
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let content = fetcher
            .fetch_url("https://chub.ai/characters/creator/adventurer")
            .await
            .unwrap();
        assert_eq!(content.kind, ContentKind::Character);
        let file = content.outcome.into_file();
        assert_eq!(file.file_name, "adventurer card.png");
        assert_eq!(file.file_type.essence_str(), "image/png");
    }

    #[tokio::test]
    async fn chub_lorebook_names_after_the_last_segment() {
        let router = Router::new().route(
            "/api/lorebooks/download",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(
                    body,
                    json!({"fullPath": "creator/world-lorebook", "format": "SILLYTAVERN"})
                );
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    Bytes::from_static(b"{\"entries\":[]}"),
                )
            }),
        );
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let content = fetcher.fetch_handle("creator/world-lorebook").await.unwrap();
        assert_eq!(content.kind, ContentKind::Lorebook);
        let file = content.outcome.into_file();
        assert_eq!(file.file_name, "world-lorebook.json");
        assert_eq!(file.file_type.essence_str(), "application/json");
    }

    #[tokio::test]
    async fn janny_resolves_then_fetches_the_file() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let download_url = format!("http://{addr}/files/abc123.png");
        let router = Router::new()
            .route(
                "/api/v1/download",
                post(move |Json(body): Json<Value>| {
                    let download_url = download_url.clone();
                    async move {
                        assert_eq!(body, json!({"characterId": "abc123"}));
                        Json(json!({"status": "ok", "downloadUrl": download_url}))
                    }
                }),
            )
            .route(
                "/files/abc123.png",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "image/webp")],
                        Bytes::from_static(b"janny bytes"),
                    )
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let content = fetcher
            .fetch_handle("abc123_character_export")
            .await
            .unwrap();
        let file = content.outcome.into_file();
        assert_eq!(file.file_name, "abc123.png");
        assert_eq!(file.file_type.essence_str(), "image/webp");
        assert_eq!(&file.buffer[..], b"janny bytes");
    }

    #[tokio::test]
    async fn janny_rejects_a_bad_resolution_document() {
        let router = Router::new().route(
            "/api/v1/download",
            post(|| async { Json(json!({"status": "pending"})) }),
        );
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let err = fetcher
            .fetch_handle("abc123_character_export")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DownloadError>(),
            Some(DownloadError::BadDocument { provider: "janny", .. })
        ));
    }

    #[tokio::test]
    async fn pygmalion_without_avatar_falls_back_to_the_document() {
        let uuid = "123e4567-e89b-12d3-a456-426614174000";
        let export = json!({"character": {"data": {"name": "Hero"}}});
        let payload = export.clone();
        let router = Router::new().route(
            "/api/export/character/{uuid}/v2",
            get(move || {
                let payload = payload.clone();
                async move { Json(payload) }
            }),
        );
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let content = fetcher.fetch_handle(uuid).await.unwrap();
        assert_eq!(content.kind, ContentKind::Character);
        assert!(content.outcome.is_fallback());
        let file = content.outcome.into_file();
        assert_eq!(file.file_name, format!("{uuid}.json"));
        assert_eq!(file.file_type.essence_str(), "application/json");
        assert_eq!(
            file.buffer,
            Bytes::from(serde_json::to_vec(&export).unwrap())
        );
    }

    #[tokio::test]
    async fn pygmalion_embeds_the_character_into_the_avatar() {
        let uuid = "123e4567-e89b-12d3-a456-426614174000";
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let export = json!({
            "character": {"data": {"avatar": format!("http://{addr}/avatars/hero.png")}}
        });
        let payload = export.clone();
        let avatar = sample_png();
        let router = Router::new()
            .route(
                "/api/export/character/{uuid}/v2",
                get(move || {
                    let payload = payload.clone();
                    async move { Json(payload) }
                }),
            )
            .route(
                "/avatars/hero.png",
                get(move || {
                    let avatar = avatar.clone();
                    async move { ([(header::CONTENT_TYPE, "image/png")], avatar) }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let content = fetcher.fetch_handle(uuid).await.unwrap();
        assert!(!content.outcome.is_fallback());
        let file = content.outcome.into_file();
        assert_eq!(file.file_name, format!("{uuid}.png"));
        assert_eq!(file.file_type.essence_str(), "image/png");
        let embedded = card::extract_metadata(&file.buffer).unwrap();
        assert_eq!(embedded, serde_json::to_string(&export["character"]).unwrap());
    }

    #[tokio::test]
    async fn risu_download_is_always_reported_as_png() {
        let uuid = "123e4567-e89b-12d3-a456-426614174000";
        let router = Router::new().route(
            "/api/v1/download/png-v3/{uuid}",
            get(|RawQuery(query): RawQuery| async move {
                assert_eq!(query.as_deref(), Some("non_commercial=true"));
                (
                    [(header::CONTENT_TYPE, "application/octet-stream")],
                    Bytes::from_static(b"risu bytes"),
                )
            }),
        );
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let content = fetcher
            .fetch_url(&format!("https://realm.risuai.net/character/{uuid}"))
            .await
            .unwrap();
        let file = content.outcome.into_file();
        assert_eq!(file.file_name, format!("{uuid}.png"));
        assert_eq!(file.file_type.essence_str(), "image/png");
    }

    #[tokio::test]
    async fn aicc_defaults_the_content_type_to_png() {
        let router = Router::new().route(
            "/wp-json/pngapi/v1/image/{author}/{card}",
            get(|| async {
                HttpResponse::builder()
                    .body(Body::from(Bytes::from_static(b"aicc bytes")))
                    .unwrap()
            }),
        );
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let content = fetcher.fetch_handle("AICC/fantasy/dragon-rider").await.unwrap();
        let file = content.outcome.into_file();
        assert_eq!(file.file_name, "fantasy-dragon-rider.png");
        assert_eq!(file.file_type.essence_str(), "image/png");
    }

    #[tokio::test]
    async fn upstream_error_status_is_surfaced() {
        let router = Router::new().route(
            "/api/characters/download",
            post(|| async { (StatusCode::NOT_FOUND, "no such card") }),
        );
        let addr = spawn_stub(router).await;
        let fetcher = downloader(test_config(&format!("http://{addr}"), Vec::new()));

        let err = fetcher.fetch_handle("creator/missing").await.unwrap_err();
        match err.downcast_ref::<DownloadError>() {
            Some(DownloadError::UpstreamStatus { provider, status }) => {
                assert_eq!(*provider, "chub");
                assert_eq!(*status, StatusCode::NOT_FOUND);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_error_body_still_surfaces_the_status() {
        let router = Router::new().route(
            "/api/characters/download",
            post(|| async { (StatusCode::BAD_GATEWAY, vec![0u8; 4096]) }),
        );
        let addr = spawn_stub(router).await;
        let mut config = test_config(&format!("http://{addr}"), Vec::new());
        config.max_download_bytes = 64;
        let fetcher = downloader(config);

        let err = fetcher.fetch_handle("creator/missing").await.unwrap_err();
        match err.downcast_ref::<DownloadError>() {
            Some(DownloadError::UpstreamStatus { provider, status }) => {
                assert_eq!(*provider, "chub");
                assert_eq!(*status, StatusCode::BAD_GATEWAY);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_download_is_rejected() {
        let router = Router::new().route(
            "/cards/big.png",
            get(|| async { Bytes::from(vec![0u8; 4096]) }),
        );
        let addr = spawn_stub(router).await;
        let mut config = test_config("http://unused.invalid", vec!["127.0.0.1".to_string()]);
        config.max_download_bytes = 64;
        let fetcher = downloader(config);

        let err = fetcher
            .fetch_url(&format!("http://{addr}/cards/big.png"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DownloadError>(),
            Some(DownloadError::TooLarge { limit: 64 })
        ));
    }
}
