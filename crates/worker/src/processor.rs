//! Frame processor implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use framewatch_core::processor::{FrameProcessor, ProcessedFrame, ProcessorConfig, ProcessorError};

/// Response header carrying the number of detections.
pub const DETECTION_COUNT_HEADER: &str = "x-detection-count";
/// Request header naming the detector model.
pub const MODEL_HEADER: &str = "x-model";

/// Returns frames unchanged with zero detections.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughProcessor;

#[async_trait]
impl FrameProcessor for PassthroughProcessor {
    async fn process(&self, image: Bytes) -> Result<ProcessedFrame, ProcessorError> {
        Ok(ProcessedFrame {
            image,
            detections: 0,
        })
    }
}

/// POSTs each frame to an external detector.
///
/// The response body is the annotated image; the detection count comes
/// from the [`DETECTION_COUNT_HEADER`] header (absent means zero).
pub struct HttpProcessor {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
}

impl HttpProcessor {
    pub fn new(
        endpoint: impl Into<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessorError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model,
        })
    }
}

#[async_trait]
impl FrameProcessor for HttpProcessor {
    async fn process(&self, image: Bytes) -> Result<ProcessedFrame, ProcessorError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(image);
        if let Some(model) = &self.model {
            request = request.header(MODEL_HEADER, model);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProcessorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let detections = match response.headers().get(DETECTION_COUNT_HEADER) {
            None => 0,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u32>().ok())
                .ok_or_else(|| {
                    ProcessorError::InvalidResponse(format!(
                        "{DETECTION_COUNT_HEADER} is not a count: {value:?}"
                    ))
                })?,
        };

        let image = response
            .bytes()
            .await
            .map_err(|e| ProcessorError::Request(e.to_string()))?;
        if image.is_empty() {
            return Err(ProcessorError::InvalidResponse("empty image body".into()));
        }

        Ok(ProcessedFrame { image, detections })
    }
}

/// Build the processor selected by `config`.
pub fn build_processor(config: &ProcessorConfig) -> Result<Arc<dyn FrameProcessor>, ProcessorError> {
    match config {
        ProcessorConfig::Passthrough => Ok(Arc::new(PassthroughProcessor)),
        ProcessorConfig::Http {
            endpoint,
            model,
            timeout_ms,
        } => Ok(Arc::new(HttpProcessor::new(
            endpoint.clone(),
            model.clone(),
            Duration::from_millis(*timeout_ms),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;

    use super::*;

    /// Detector stand-in: echoes the image reversed, counts its bytes.
    async fn detector(headers: HeaderMap, body: Bytes) -> axum::response::Response {
        if headers.get(MODEL_HEADER).map(|v| v.as_bytes()) == Some(&b"broken"[..]) {
            return (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response();
        }
        let mut annotated = body.to_vec();
        annotated.reverse();
        (
            [(DETECTION_COUNT_HEADER, body.len().to_string())],
            annotated,
        )
            .into_response()
    }

    async fn spawn_detector() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/detect", post(detector));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/detect")
    }

    #[tokio::test]
    async fn passthrough_returns_input() {
        let out = PassthroughProcessor
            .process(Bytes::from_static(b"frame"))
            .await
            .unwrap();
        assert_eq!(out.image, Bytes::from_static(b"frame"));
        assert_eq!(out.detections, 0);
    }

    #[tokio::test]
    async fn http_processor_reads_image_and_count() {
        let endpoint = spawn_detector().await;
        let processor = HttpProcessor::new(endpoint, None, Duration::from_secs(5)).unwrap();

        let out = processor.process(Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(out.image, Bytes::from_static(b"cba"));
        assert_eq!(out.detections, 3);
    }

    #[tokio::test]
    async fn http_processor_reports_error_status() {
        let endpoint = spawn_detector().await;
        let processor =
            HttpProcessor::new(endpoint, Some("broken".into()), Duration::from_secs(5)).unwrap();

        let result = processor.process(Bytes::from_static(b"abc")).await;
        assert_matches!(result, Err(ProcessorError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn unreachable_detector_is_a_request_error() {
        let processor = HttpProcessor::new(
            "http://127.0.0.1:9/detect",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let result = processor.process(Bytes::from_static(b"abc")).await;
        assert_matches!(result, Err(ProcessorError::Request(_)));
    }
}
