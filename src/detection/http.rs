use std::time::Duration;

use super::{AnnotateError, DetectionClient, DetectionRequest, DetectionResponse};

/// Talks to the detection service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDetectionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDetectionClient {
    /// `timeout` of `None` leaves the transport default (no deadline).
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `GET /health` on the endpoint's origin.
    pub async fn health(&self) -> Result<String, AnnotateError> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| AnnotateError::Transport(format!("invalid endpoint: {e}")))?;
        url.set_path("/health");
        url.set_query(None);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AnnotateError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AnnotateError::Service {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

impl DetectionClient for HttpDetectionClient {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionResponse, AnnotateError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| AnnotateError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnnotateError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnnotateError::Transport(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| AnnotateError::Decode(e.to_string()))
    }
}
