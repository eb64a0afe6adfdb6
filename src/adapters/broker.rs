//! Event broker sink: posts structured CloudEvents to the broker endpoint.

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, info};

use super::{EventSink, SinkError};
use crate::domain::OutboundEvent;

const CLOUDEVENTS_JSON: &str = "application/cloudevents+json";

/// Sends outbound events to the event broker over HTTP
pub struct BrokerSink {
    endpoint: Url,
    client: reqwest::Client,
}

impl BrokerSink {
    /// Create a sink for `endpoint`; the scheme defaults to `http`
    pub fn new(endpoint: &str) -> Result<Self, SinkError> {
        let endpoint = parse_endpoint(endpoint)?;
        Ok(Self {
            endpoint,
            client: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Parse a broker endpoint, defaulting the scheme and requiring a host
pub fn parse_endpoint(raw: &str) -> Result<Url, SinkError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SinkError::Endpoint("Host of eventbroker not set".to_string()));
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| SinkError::Endpoint(format!("'{}': {}", raw, e)))?;

    if url.host_str().map_or(true, str::is_empty) {
        return Err(SinkError::Endpoint("Host of eventbroker not set".to_string()));
    }

    Ok(url)
}

#[async_trait]
impl EventSink for BrokerSink {
    fn name(&self) -> &str {
        "broker"
    }

    async fn send(&self, event: &OutboundEvent) -> Result<(), SinkError> {
        let body = serde_json::to_vec(event)?;
        debug!(endpoint = %self.endpoint, event_type = %event.event_type, "Sending event");

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", CLOUDEVENTS_JSON)
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SinkError::Delivery(format!(
                "broker answered {}: {}",
                status, text
            )));
        }

        info!(event_type = %event.event_type, id = %event.id, "Event delivered");
        Ok(())
    }
}
