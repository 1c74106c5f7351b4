//! One-shot endpoint check: does the route answer, and does a body start flowing?

use futures_util::StreamExt;
use serde::Serialize;

use crate::consumer::StreamConsumer;
use crate::error::{CoreResult, StreamError};
use crate::http_client::RequestCtx;
use crate::model::StreamRequest;

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub status: u16,
    pub streaming_working: bool,
    pub first_chunk_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST `request`, read only the first body chunk and drop the connection.
///
/// A non-success status is part of the report. Failing to reach the endpoint
/// at all is an error.
pub async fn probe(consumer: &StreamConsumer, request: &StreamRequest) -> CoreResult<ProbeReport> {
    let endpoint = consumer.endpoint();
    let headers: Vec<(&str, &str)> = endpoint
        .headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let bearer = endpoint.api_key();
    let ctx = RequestCtx {
        request_id: request.request_id.as_deref(),
        conversation_id: None,
    };

    let opened = match consumer
        .http()
        .post_stream(&endpoint.url, request, &headers, bearer.as_ref(), &ctx)
        .await
    {
        Ok(o) => o,
        Err(StreamError::Connection { status, message }) => {
            tracing::info!(status, "probe got non-success status");
            return Ok(ProbeReport {
                status,
                streaming_working: false,
                first_chunk_preview: None,
                error: Some(message),
            });
        }
        Err(e) => return Err(e),
    };

    let mut body = opened.body;
    let (preview, error) = match body.next().await {
        Some(Ok(chunk)) => (Some(preview_of(&chunk)), None),
        Some(Err(e)) => (None, Some(e.to_string())),
        None => (None, None),
    };
    drop(body);

    let report = ProbeReport {
        status: opened.status,
        streaming_working: preview.as_deref().is_some_and(|p| !p.is_empty()),
        first_chunk_preview: preview,
        error,
    };
    tracing::info!(
        status = report.status,
        streaming_working = report.streaming_working,
        "probe finished"
    );
    Ok(report)
}

fn preview_of(chunk: &[u8]) -> String {
    String::from_utf8_lossy(chunk).chars().take(PREVIEW_CHARS).collect()
}
