//! Hierarchical resource resolution.
//!
//! Files are looked up at service level, then stage level, then project
//! level; the first scope returning non-empty content wins. Hits are written
//! to `<work_dir>/<correlation id>/<relative path>` so concurrent events never
//! share a file. In local mode the hierarchy is bypassed and files are read
//! from a local directory as-is.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use super::plan::StorageErrorPolicy;
use crate::adapters::{RepositoryError, ResourceRepository, Scope};
use crate::domain::EventContext;

/// Errors that abort resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Failed to fetch {path} at {scope} level: {source}")]
    Repository {
        scope: Scope,
        path: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Content found for a relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Scope that answered; `None` in local mode
    pub scope: Option<Scope>,
    pub content: String,
}

/// A resolved file ready to be executed.
///
/// Files materialized from the repository are owned and removed on drop,
/// together with any directories left empty below the work dir.
#[derive(Debug)]
pub struct ResourceDescriptor {
    pub relative_path: String,
    pub local_path: PathBuf,
    pub extension: String,
    pub scope: Option<Scope>,
    /// Directory below which cleanup may remove empty parents
    cleanup_root: Option<PathBuf>,
}

impl ResourceDescriptor {
    fn new(relative_path: &str, local_path: PathBuf, scope: Option<Scope>, cleanup_root: Option<PathBuf>) -> Self {
        Self {
            extension: extension_of(relative_path),
            relative_path: relative_path.to_string(),
            local_path,
            scope,
            cleanup_root,
        }
    }

    /// Whether the file is removed when the descriptor is dropped
    pub fn is_owned(&self) -> bool {
        self.cleanup_root.is_some()
    }
}

impl Drop for ResourceDescriptor {
    fn drop(&mut self) {
        let Some(root) = &self.cleanup_root else {
            return;
        };

        if let Err(e) = std::fs::remove_file(&self.local_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.local_path.display(), error = %e, "Failed to remove resource");
            }
        }

        // best effort: remove_dir fails on non-empty directories
        let mut dir = self.local_path.parent();
        while let Some(d) = dir {
            if d == root.as_path() || !d.starts_with(root) || std::fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

/// Locates and materializes configuration files
#[derive(Clone)]
pub struct ResourceResolver {
    repository: Arc<dyn ResourceRepository>,
    work_dir: PathBuf,
    /// Local mode root; `None` uses the repository
    local_root: Option<PathBuf>,
    storage_error_policy: StorageErrorPolicy,
}

impl ResourceResolver {
    pub fn new(repository: Arc<dyn ResourceRepository>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            repository,
            work_dir: work_dir.into(),
            local_root: None,
            storage_error_policy: StorageErrorPolicy::default(),
        }
    }

    /// Read files from `root` instead of the repository
    pub fn with_local_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_root = Some(root.into());
        self
    }

    pub fn with_storage_error_policy(mut self, policy: StorageErrorPolicy) -> Self {
        self.storage_error_policy = policy;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Probe for `relative_path` without writing anything
    pub async fn locate(&self, ctx: &EventContext, relative_path: &str) -> Result<Option<Located>, ResolveError> {
        if let Some(root) = &self.local_root {
            return self.locate_local(root, relative_path).await;
        }

        for scope in Scope::SEARCH_ORDER {
            match self
                .repository
                .get_resource(scope, &ctx.scope, relative_path)
                .await
            {
                Ok(Some(content)) if !content.is_empty() => {
                    debug!(file = relative_path, %scope, "Resource found");
                    return Ok(Some(Located {
                        scope: Some(scope),
                        content,
                    }));
                }
                Ok(_) => {}
                Err(source) => match self.storage_error_policy {
                    StorageErrorPolicy::Fatal => {
                        return Err(ResolveError::Repository {
                            scope,
                            path: relative_path.to_string(),
                            source,
                        })
                    }
                    StorageErrorPolicy::TreatAsNotFound => {
                        warn!(file = relative_path, %scope, error = %source, "Resource repository error, treating as not found");
                    }
                },
            }
        }

        Ok(None)
    }

    /// Locate `relative_path` and make it available on the local filesystem
    pub async fn resolve(&self, ctx: &EventContext, relative_path: &str) -> Result<Option<ResourceDescriptor>, ResolveError> {
        let Some(located) = self.locate(ctx, relative_path).await? else {
            return Ok(None);
        };

        if let Some(root) = &self.local_root {
            return Ok(Some(ResourceDescriptor::new(
                relative_path,
                root.join(relative_path.trim_start_matches('/')),
                None,
                None,
            )));
        }

        let local_path = self.materialized_path(ctx, relative_path);
        write_resource(&local_path, &located.content).await?;

        debug!(file = relative_path, path = %local_path.display(), "Resource materialized");
        Ok(Some(ResourceDescriptor::new(
            relative_path,
            local_path,
            located.scope,
            Some(self.work_dir.clone()),
        )))
    }

    /// `<work_dir>/<correlation id>/<relative path>`
    pub fn materialized_path(&self, ctx: &EventContext, relative_path: &str) -> PathBuf {
        let mut path = self.work_dir.join(path_component(&ctx.context, &ctx.event_id));
        for part in relative_path.split('/') {
            if !part.is_empty() && part != "." && part != ".." {
                path.push(part);
            }
        }
        path
    }

    async fn locate_local(&self, root: &Path, relative_path: &str) -> Result<Option<Located>, ResolveError> {
        let path = root.join(relative_path.trim_start_matches('/'));
        match fs::read_to_string(&path).await {
            Ok(content) if !content.is_empty() => {
                debug!(file = relative_path, "Resource found locally");
                Ok(Some(Located {
                    scope: None,
                    content,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ResolveError::Io { path, source }),
        }
    }
}

async fn write_resource(path: &Path, content: &str) -> Result<(), ResolveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| ResolveError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    fs::write(path, content)
        .await
        .map_err(|source| ResolveError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if extension_of(&path.to_string_lossy()) == "sh" {
        set_executable(path).await?;
    }

    Ok(())
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<(), ResolveError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
        .await
        .map_err(|source| ResolveError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<(), ResolveError> {
    Ok(())
}

/// Extension without the dot, empty if none
pub fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string()
}

/// A single safe path component derived from the correlation id
fn path_component(context: &str, fallback: &str) -> String {
    let raw = if context.is_empty() { fallback } else { context };
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "event".to_string()
    } else {
        cleaned
    }
}
