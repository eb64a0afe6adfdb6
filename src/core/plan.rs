//! Candidate planning for one inbound event.
//!
//! An event name like `deployment.finished` maps to the ordered candidate
//! files `<folder>deployment.finished.sh`, `.py`, `.http`, followed by the
//! generic `all.events.*` fallbacks.

use serde::{Deserialize, Serialize};

use crate::domain::EventContext;

/// Supported file extensions, in the order they are tried
pub const EXTENSIONS: [&str; 3] = ["sh", "py", "http"];

/// Base name of the catch-all files
pub const FALLBACK_NAME: &str = "all.events";

/// How multi-match (action-triggered) execution proceeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Stop after the first event name whose file executed successfully
    FirstSuccess,
    /// Execute the first match of every event name
    #[default]
    RunAll,
}

/// How resource repository errors are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorPolicy {
    /// Abort the event
    #[default]
    Fatal,
    /// Log and continue as if the file did not exist
    TreatAsNotFound,
}

/// Ordered candidates for one event name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSet {
    pub event_name: String,
    /// Scope-relative paths, most specific first
    pub files: Vec<String>,
}

/// All candidate sets for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub sets: Vec<CandidateSet>,
    /// Whether every set is executed (action triggers) or only the first hit
    pub multi_match: bool,
    /// Whether started/finished notifications are emitted
    pub lifecycle: bool,
}

impl ExecutionPlan {
    /// Plan the files to try for `ctx` below `folder`
    pub fn for_event(ctx: &EventContext, folder: &str) -> Self {
        let sets = ctx
            .event_names()
            .into_iter()
            .map(|name| CandidateSet {
                files: candidate_files(folder, &name),
                event_name: name,
            })
            .collect();

        Self {
            sets,
            multi_match: ctx.event_type.is_action_trigger(),
            lifecycle: ctx.event_type.requires_lifecycle(),
        }
    }

    /// Every candidate path in try order, without duplicates
    pub fn all_files(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for file in self.sets.iter().flat_map(|s| s.files.iter()) {
            if !seen.contains(&file.as_str()) {
                seen.push(file.as_str());
            }
        }
        seen
    }
}

/// Candidate paths for one event name
pub fn candidate_files(folder: &str, event_name: &str) -> Vec<String> {
    let folder = normalize_folder(folder);
    let specific = EXTENSIONS
        .iter()
        .map(|ext| format!("{}{}.{}", folder, event_name, ext));
    let fallback = EXTENSIONS
        .iter()
        .map(|ext| format!("{}{}.{}", folder, FALLBACK_NAME, ext));
    specific.chain(fallback).collect()
}

/// Ensure a non-empty folder ends with exactly one `/`
fn normalize_folder(folder: &str) -> String {
    let trimmed = folder.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
