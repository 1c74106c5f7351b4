use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{CoreResult, StreamError};

/// Request context carries correlation IDs.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub conversation_id: Option<&'a str>,
}

/// Raw response body, chunk by chunk, in arrival order.
pub type ByteStream = BoxStream<'static, CoreResult<Bytes>>;

/// An established exchange: status was 2xx and the body is ready to read.
pub struct OpenedBody {
    pub status: u16,
    pub latency_ms: u32,
    pub body: ByteStream,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| StreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("sporestream/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    /// POST JSON and hand back the response body as a byte stream.
    ///
    /// Fails before any body is read if the endpoint is unreachable or
    /// answers with a non-success status.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        bearer: Option<&SecretString>,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<OpenedBody> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(token) = bearer {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(cid) = ctx.conversation_id {
            req = req.header("X-Conversation-Id", cid);
        }

        let resp = req.send().await.map_err(|e| StreamError::Unavailable {
            reason: e.to_string(),
        })?;

        let latency_ms = start.elapsed().as_millis() as u32;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &text));
        }

        let body = resp
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| StreamError::Unavailable {
                    reason: format!("body read failed: {e}"),
                })
            })
            .boxed();
        Ok(OpenedBody {
            status: status.as_u16(),
            latency_ms,
            body,
        })
    }
}

fn map_http_error(status: StatusCode, body: &str) -> StreamError {
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        truncate(body, 300)
    };
    StreamError::Connection {
        status: status.as_u16(),
        message,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_stream_success_yields_body() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/api/ai/stream")
                .header("accept", "text/event-stream")
                .header("x-request-id", "rid")
                .header("x-conversation-id", "conv-1")
                .header("authorization", "Bearer sekrit")
                .header("x-client", "test");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: [DONE]\n");
        });

        let client = HttpClient::new_default().unwrap();
        let ctx = RequestCtx {
            request_id: Some("rid"),
            conversation_id: Some("conv-1"),
        };
        let token = SecretString::from("sekrit".to_string());
        let opened = client
            .post_stream(
                &format!("{}/api/ai/stream", server.base_url()),
                &json!({"messages": []}),
                &[("x-client", "test")],
                Some(&token),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(opened.status, 200);
        let chunks: Vec<_> = opened.body.collect().await;
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(body, b"data: [DONE]\n");
        m.assert();
    }

    #[tokio::test]
    async fn post_stream_429_maps_to_connection_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/api/ai/stream");
            then.status(429).body("Rate limit exceeded");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream(
                &format!("{}/api/ai/stream", server.base_url()),
                &json!({}),
                &[],
                None,
                &RequestCtx::default(),
            )
            .await
            .err()
            .expect("429 should fail");

        match err {
            StreamError::Connection { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit exceeded");
            }
            other => panic!("expected Connection, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_error_body_uses_reason_phrase() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/api/ai/stream");
            then.status(401);
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream(
                &format!("{}/api/ai/stream", server.base_url()),
                &json!({}),
                &[],
                None,
                &RequestCtx::default(),
            )
            .await
            .err()
            .expect("401 should fail");
        match err {
            StreamError::Connection { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("expected Connection, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_stream_500_truncates_body() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/api/ai/stream");
            then.status(500).body(big.clone());
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream(
                &format!("{}/api/ai/stream", server.base_url()),
                &json!({}),
                &[],
                None,
                &RequestCtx::default(),
            )
            .await
            .err()
            .expect("500 should fail");
        match err {
            StreamError::Connection { message, .. } => {
                assert!(message.ends_with("..."));
                assert!(message.len() <= 303);
            }
            other => panic!("expected Connection, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn network_error_maps_to_unavailable() {
        // Attempt to connect to a likely-closed port to simulate network error quickly.
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_stream(
                "http://127.0.0.1:9/api/ai/stream",
                &json!({}),
                &[],
                None,
                &RequestCtx::default(),
            )
            .await
            .err()
            .expect("closed port should fail");
        assert!(matches!(err, StreamError::Unavailable { .. }));
        assert!(err.is_connection());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "\u{e9}".repeat(200);
        let t = truncate(&s, 301);
        assert!(t.ends_with("..."));
        assert!(t.is_char_boundary(t.len() - 3));
    }
}
