//! HTTP client for the origin server
//!
//! The client knows nothing about the cache: it issues HEAD and GET requests
//! for a request URI and returns headers (and a body stream) as plain values.

use crate::config::OriginConfig;
use crate::dns::CachingResolver;
use crate::error::OriginError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{redirect, Client};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Streamed response body from the origin
pub type BodyStream = BoxStream<'static, Result<Bytes, OriginError>>;

/// Headers reported by a HEAD request, keys lower-cased
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginMetadata {
    pub headers: BTreeMap<String, String>,
}

impl OriginMetadata {
    /// `content-length` as reported by the origin; missing or invalid is 0
    pub fn content_length(&self) -> u64 {
        self.headers
            .get("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Headers plus streamed body of a GET request
pub struct OriginResponse {
    pub headers: BTreeMap<String, String>,
    pub body: BodyStream,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Access to the origin server
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// HEAD `origin + request_uri`
    async fn head(&self, request_uri: &str) -> Result<OriginMetadata, OriginError>;

    /// GET `origin + request_uri`
    async fn get(&self, request_uri: &str) -> Result<OriginResponse, OriginError>;
}

/// reqwest-backed origin client
pub struct HttpOrigin {
    client: Client,
    config: OriginConfig,
}

impl HttpOrigin {
    pub fn new(config: OriginConfig) -> Result<Self, OriginError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(true)
            .redirect(redirect::Policy::none())
            .dns_resolver(CachingResolver::new(config.dns_cache_ttl));

        if let Some(ip) = config.ip_override {
            let url = url::Url::parse(&config.base_url)
                .map_err(|e| OriginError::Other(format!("invalid origin URL: {}", e)))?;
            let host = url
                .host_str()
                .ok_or_else(|| OriginError::Other("origin URL has no host".to_string()))?
                .to_string();
            let port = config
                .port
                .or_else(|| url.port_or_known_default())
                .unwrap_or(443);
            debug!(host = %host, ip = %ip, port, "Pinning origin host to static address");
            builder = builder.resolve(&host, SocketAddr::new(ip, port));
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    fn url_for(&self, request_uri: &str) -> String {
        format!("{}{}", self.config.base_url, request_uri)
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.trim().to_string()))
        })
        .collect()
}

#[async_trait]
impl OriginClient for HttpOrigin {
    async fn head(&self, request_uri: &str) -> Result<OriginMetadata, OriginError> {
        let url = self.url_for(request_uri);
        debug!(url = %url, "HEAD origin");

        let response = self
            .client
            .head(&url)
            .timeout(self.config.head_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_redirection() {
            warn!(status = %status, url = %url, "Origin redirected HEAD request");
            return Err(OriginError::Redirect(status.as_u16()));
        }
        if !status.is_success() {
            return Err(OriginError::Status(status.as_u16()));
        }

        Ok(OriginMetadata {
            headers: collect_headers(response.headers()),
        })
    }

    async fn get(&self, request_uri: &str) -> Result<OriginResponse, OriginError> {
        let url = self.url_for(request_uri);
        debug!(url = %url, "GET origin");

        let response = self
            .client
            .get(&url)
            .timeout(self.config.get_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %url, "Origin GET failed");
            return Err(OriginError::Status(status.as_u16()));
        }

        let headers = collect_headers(response.headers());
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(OriginError::from))
            .boxed();

        Ok(OriginResponse { headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};
    use axum::response::Redirect;
    use axum::routing::get;
    use axum::Router;

    async fn spawn_origin() -> String {
        let app = Router::new()
            .route(
                "/img/a.png",
                get(|| async {
                    (
                        [
                            (header::CONTENT_TYPE, "image/png"),
                            (header::HeaderName::from_static("x-origin"), "test"),
                        ],
                        "abc",
                    )
                }),
            )
            .route("/moved.png", get(|| async { Redirect::temporary("/img/a.png") }))
            .route("/gone.png", get(|| async { StatusCode::NOT_FOUND }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_response_debug_omits_body() {
        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), "3".to_string());
        let response = OriginResponse {
            headers,
            body: futures::stream::empty().boxed(),
        };
        let rendered = format!("{:?}", response);
        assert!(rendered.contains("content-length"));
        assert!(!rendered.contains("body"));
    }

    #[test]
    fn test_content_length_parsing() {
        let mut meta = OriginMetadata::default();
        assert_eq!(meta.content_length(), 0);
        meta.headers
            .insert("content-length".to_string(), "1000".to_string());
        assert_eq!(meta.content_length(), 1000);
        meta.headers
            .insert("content-length".to_string(), "bogus".to_string());
        assert_eq!(meta.content_length(), 0);
    }

    #[tokio::test]
    async fn test_head_captures_headers() {
        let base = spawn_origin().await;
        let origin = HttpOrigin::new(OriginConfig::new(base)).unwrap();

        let meta = origin.head("/img/a.png").await.unwrap();
        assert_eq!(meta.headers.get("x-origin").map(String::as_str), Some("test"));
        assert_eq!(
            meta.headers.get("content-type").map(String::as_str),
            Some("image/png")
        );
    }

    #[tokio::test]
    async fn test_head_redirect_is_error() {
        let base = spawn_origin().await;
        let origin = HttpOrigin::new(OriginConfig::new(base)).unwrap();

        let err = origin.head("/moved.png").await.unwrap_err();
        assert!(matches!(err, OriginError::Redirect(307)));
    }

    #[tokio::test]
    async fn test_head_missing_resource() {
        let base = spawn_origin().await;
        let origin = HttpOrigin::new(OriginConfig::new(base)).unwrap();

        let err = origin.head("/gone.png").await.unwrap_err();
        assert!(matches!(err, OriginError::Status(404)));
    }

    #[tokio::test]
    async fn test_get_streams_body() {
        let base = spawn_origin().await;
        let origin = HttpOrigin::new(OriginConfig::new(base)).unwrap();

        let response = origin.get("/img/a.png").await.unwrap();
        let chunks: Vec<Bytes> = response
            .body
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), b"abc");
    }

    #[tokio::test]
    async fn test_get_unreachable_origin() {
        let mut config = OriginConfig::new("http://127.0.0.1:1");
        config.connect_timeout = std::time::Duration::from_secs(2);
        let origin = HttpOrigin::new(config).unwrap();

        let err = origin.get("/a.png").await.unwrap_err();
        assert!(matches!(err, OriginError::Http(_)));
    }

    #[tokio::test]
    async fn test_host_names_go_through_resolver() {
        let base = spawn_origin().await;
        let port: u16 = base.rsplit(':').next().unwrap().parse().unwrap();
        let origin = HttpOrigin::new(OriginConfig::new(format!("http://localhost:{}", port))).unwrap();

        let meta = origin.head("/img/a.png").await.unwrap();
        assert_eq!(meta.headers.get("x-origin").map(String::as_str), Some("test"));
    }

    #[tokio::test]
    async fn test_ip_override_resolves_host() {
        let base = spawn_origin().await;
        let port: u16 = base.rsplit(':').next().unwrap().parse().unwrap();
        let mut config = OriginConfig::new(format!("http://static.invalid:{}", port));
        config.ip_override = Some("127.0.0.1".parse().unwrap());

        let origin = HttpOrigin::new(config).unwrap();
        assert!(origin.head("/img/a.png").await.is_ok());
    }
}
