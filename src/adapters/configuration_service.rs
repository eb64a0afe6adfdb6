//! Configuration-service client for scope-hierarchy resources.
//!
//! Endpoints (resource path is a single percent-encoded segment):
//! - `GET /v1/project/{p}/stage/{s}/service/{svc}/resource/{path}`
//! - `GET /v1/project/{p}/stage/{s}/resource/{path}`
//! - `GET /v1/project/{p}/resource/{path}`

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::{RepositoryError, ResourceRepository, Scope};
use crate::domain::ScopeIds;

/// Resource document returned by the configuration service
#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(default, rename = "resourceContent")]
    resource_content: Option<String>,
}

/// HTTP client for the configuration service
pub struct ConfigurationServiceClient {
    base_url: Url,
    client: reqwest::Client,
}

impl ConfigurationServiceClient {
    /// Create a client for `base_url`; a missing scheme defaults to `http`
    pub fn new(base_url: &str) -> Result<Self, RepositoryError> {
        let with_scheme = if base_url.contains("://") {
            base_url.to_string()
        } else {
            format!("http://{}", base_url)
        };
        let base_url = Url::parse(&with_scheme).map_err(|e| {
            RepositoryError::Transport(format!("invalid base URL '{}': {}", with_scheme, e))
        })?;

        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
        })
    }

    /// Build the lookup URL for `path` at `scope`
    pub fn resource_url(&self, scope: Scope, ids: &ScopeIds, path: &str) -> Result<Url, RepositoryError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RepositoryError::Transport(format!("base URL cannot be a base: {}", self.base_url))
            })?;
            segments.pop_if_empty();
            segments.extend(["v1", "project", ids.project.as_str()]);
            match scope {
                Scope::Service => {
                    segments.extend(["stage", ids.stage.as_str(), "service", ids.service.as_str()]);
                }
                Scope::Stage => {
                    segments.extend(["stage", ids.stage.as_str()]);
                }
                Scope::Project => {}
            }
            // push() encodes '/' inside the resource path
            segments.push("resource").push(path);
        }
        Ok(url)
    }
}

#[async_trait]
impl ResourceRepository for ConfigurationServiceClient {
    async fn get_resource(
        &self,
        scope: Scope,
        ids: &ScopeIds,
        path: &str,
    ) -> Result<Option<String>, RepositoryError> {
        // a scope without an id cannot hold the resource
        let missing_id = match scope {
            Scope::Service => ids.service.is_empty() || ids.stage.is_empty(),
            Scope::Stage => ids.stage.is_empty(),
            Scope::Project => false,
        };
        if ids.project.is_empty() || missing_id {
            return Ok(None);
        }

        let url = self.resource_url(scope, ids, path)?;
        debug!(%url, %scope, "Fetching resource");

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| RepositoryError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RepositoryError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let resource: Resource = response.json().await.map_err(|e| RepositoryError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(resource.resource_content.filter(|c| !c.is_empty()))
    }
}
