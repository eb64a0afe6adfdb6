//! In-memory resource repository.
//!
//! Keeps resources per scope and path, ignoring scope ids. Used when
//! embedding the executor without a configuration service, and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{RepositoryError, ResourceRepository, Scope};
use crate::domain::ScopeIds;

#[derive(Debug, Default)]
pub struct MemoryRepository {
    resources: Mutex<HashMap<(Scope, String), String>>,
    unavailable: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` at `path` for one scope
    pub fn insert(&self, scope: Scope, path: impl Into<String>, content: impl Into<String>) {
        if let Ok(mut resources) = self.resources.lock() {
            resources.insert((scope, path.into()), content.into());
        }
    }

    /// Make every lookup fail with a transport error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceRepository for MemoryRepository {
    async fn get_resource(
        &self,
        scope: Scope,
        _ids: &ScopeIds,
        path: &str,
    ) -> Result<Option<String>, RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Transport(
                "repository unavailable".to_string(),
            ));
        }

        let resources = self
            .resources
            .lock()
            .map_err(|e| RepositoryError::Transport(e.to_string()))?;
        Ok(resources.get(&(scope, path.to_string())).cloned())
    }
}
