//! Token service clients.
//!
//! HTTP endpoint: GET `<base_url>?channelName=<channel>&uid=<entity>`
//! Response body: `{"token": "<opaque>"}`

use std::future::Future;
use std::time::Duration;

use prox_core::{ChannelId, EntityId, Token};
use serde::Deserialize;

use crate::config::{SourceKind, TokenConfig};
use crate::error::{LinkError, Result};

/// Something that can mint a channel-scoped token for an entity.
pub trait TokenSource: Send + Sync + 'static {
    fn fetch(
        &self,
        channel: &ChannelId,
        entity: EntityId,
    ) -> impl Future<Output = Result<Token>> + Send;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Fetches tokens from the HTTP token service.
#[derive(Clone, Debug)]
pub struct HttpTokenSource {
    base_url: String,
    timeout_ms: u64,
    http: reqwest::Client,
}

impl HttpTokenSource {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            base_url: base_url.to_owned(),
            timeout_ms,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl TokenSource for HttpTokenSource {
    async fn fetch(&self, channel: &ChannelId, entity: EntityId) -> Result<Token> {
        let uid = entity.to_string();
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[("channelName", channel.as_str()), ("uid", uid.as_str())])
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LinkError::Status(status.as_u16()));
        }

        let body: TokenResponse = resp.json().await.map_err(|e| self.classify(e))?;
        match body.token {
            Some(t) if !t.is_empty() => {
                tracing::debug!(channel = %channel, uid = %entity, "token fetched");
                Ok(Token::new(t))
            }
            _ => Err(LinkError::MissingToken),
        }
    }
}

impl HttpTokenSource {
    fn classify(&self, e: reqwest::Error) -> LinkError {
        if e.is_timeout() {
            LinkError::Timeout(self.timeout_ms)
        } else {
            LinkError::Http(e)
        }
    }
}

/// Offline tokens of the form `<prefix><channel>`, for replays and tests.
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
    prefix: String,
}

impl StaticTokenSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl TokenSource for StaticTokenSource {
    async fn fetch(&self, channel: &ChannelId, _entity: EntityId) -> Result<Token> {
        Ok(Token::new(format!("{}{}", self.prefix, channel)))
    }
}

/// The source selected by `[token] source`.
#[derive(Clone, Debug)]
pub enum ConfiguredSource {
    Http(HttpTokenSource),
    Static(StaticTokenSource),
}

impl ConfiguredSource {
    pub fn from_config(cfg: &TokenConfig) -> Result<Self> {
        Ok(match cfg.source {
            SourceKind::Http => Self::Http(HttpTokenSource::new(&cfg.base_url, cfg.timeout_ms)?),
            SourceKind::Static => Self::Static(StaticTokenSource::new(cfg.static_prefix.clone())),
        })
    }
}

impl TokenSource for ConfiguredSource {
    async fn fetch(&self, channel: &ChannelId, entity: EntityId) -> Result<Token> {
        match self {
            Self::Http(s) => s.fetch(channel, entity).await,
            Self::Static(s) => s.fetch(channel, entity).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;

    use super::*;

    async fn token_handler(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
        let channel = params.get("channelName").cloned().unwrap_or_default();
        let uid = params.get("uid").cloned().unwrap_or_default();
        axum::Json(serde_json::json!({ "token": format!("{channel}:{uid}") }))
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/token")
    }

    #[tokio::test]
    async fn test_http_fetch_sends_channel_and_uid() {
        let url = serve(Router::new().route("/token", get(token_handler))).await;
        let src = HttpTokenSource::new(&url, 2000).unwrap();
        let t = src.fetch(&ChannelId::new("C7"), EntityId(42)).await.unwrap();
        assert_eq!(t.as_str(), "C7:42");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let url = serve(Router::new().route(
            "/token",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let src = HttpTokenSource::new(&url, 2000).unwrap();
        let err = src.fetch(&ChannelId::new("C1"), EntityId(1)).await.unwrap_err();
        assert!(matches!(err, LinkError::Status(503)));
    }

    #[tokio::test]
    async fn test_http_missing_token_field() {
        let url = serve(Router::new().route(
            "/token",
            get(|| async { axum::Json(serde_json::json!({ "other": 1 })) }),
        ))
        .await;
        let src = HttpTokenSource::new(&url, 2000).unwrap();
        let err = src.fetch(&ChannelId::new("C1"), EntityId(1)).await.unwrap_err();
        assert!(matches!(err, LinkError::MissingToken));
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let url = serve(Router::new().route(
            "/token",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                axum::Json(serde_json::json!({ "token": "late" }))
            }),
        ))
        .await;
        let src = HttpTokenSource::new(&url, 50).unwrap();
        let err = src.fetch(&ChannelId::new("C1"), EntityId(1)).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout(50)), "got {err}");
    }

    #[tokio::test]
    async fn test_static_source() {
        let src = StaticTokenSource::new("tok-");
        let t = src.fetch(&ChannelId::new("abc"), EntityId(3)).await.unwrap();
        assert_eq!(t.as_str(), "tok-abc");
    }

    #[tokio::test]
    async fn test_configured_source_dispatch() {
        let cfg = TokenConfig {
            source: SourceKind::Static,
            static_prefix: "s-".into(),
            ..TokenConfig::default()
        };
        let src = ConfiguredSource::from_config(&cfg).unwrap();
        assert!(matches!(src, ConfiguredSource::Static(_)));
        let t = src.fetch(&ChannelId::new("C1"), EntityId(1)).await.unwrap();
        assert_eq!(t.as_str(), "s-C1");
    }
}
