//! Secret filtering for environment variables.
//!
//! Any variable whose lowercased name matches a denylist pattern is never
//! exposed to placeholder substitution nor copied into a script's
//! environment. `secret_*` is always part of the denylist.

use glob::Pattern;

/// Pattern that can never be removed from the denylist
pub const MANDATORY_SECRET_PATTERN: &str = "secret_*";

/// Glob denylist applied to lowercased environment variable names
#[derive(Debug, Clone)]
pub struct SecretFilter {
    patterns: Vec<Pattern>,
}

impl Default for SecretFilter {
    fn default() -> Self {
        Self::with_patterns(std::iter::empty::<&str>())
    }
}

impl SecretFilter {
    /// Build a filter from extra patterns; invalid patterns are skipped.
    pub fn with_patterns<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Vec::new();
        if let Ok(p) = Pattern::new(MANDATORY_SECRET_PATTERN) {
            patterns.push(p);
        }
        for raw in extra {
            let raw = raw.as_ref().to_lowercase();
            match Pattern::new(&raw) {
                Ok(p) => patterns.push(p),
                Err(e) => tracing::warn!(pattern = %raw, error = %e, "Ignoring invalid secret pattern"),
            }
        }
        Self { patterns }
    }

    /// Check whether a variable name must be hidden
    pub fn is_secret(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        // the mandatory rule holds even if glob matching were to change
        lowered.starts_with("secret_") || self.patterns.iter().any(|p| p.matches(&lowered))
    }

    /// Keep only the non-secret variables
    pub fn visible<I>(&self, vars: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter(|(name, _)| !self.is_secret(name))
            .collect()
    }
}
