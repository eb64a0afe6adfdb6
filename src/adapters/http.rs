//! Generic HTTP client used to execute parsed `.http` definition files.

use reqwest::Method;
use thiserror::Error;
use tracing::debug;

use crate::core::http_request::GenericHttpRequest;

/// Errors that prevent an HTTP call from completing
#[derive(Debug, Error)]
pub enum HttpCallError {
    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("{0}")]
    Transport(String),
}

/// Raw response of a completed HTTP call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

/// HTTP client wrapper
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the request and return status and body, whatever the status
    pub async fn execute(&self, request: &GenericHttpRequest) -> Result<HttpResponse, HttpCallError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HttpCallError::InvalidMethod(request.method.clone()))?;

        debug!(method = %method, uri = %request.uri, headers = request.headers.len(), "Sending HTTP request");

        let mut builder = self.client.request(method, &request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HttpCallError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HttpCallError::Transport(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}
