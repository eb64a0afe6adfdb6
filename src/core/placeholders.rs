//! Placeholder substitution and script environment construction.
//!
//! The inbound event is walked as a generic JSON tree. Every scalar leaf
//! produces a `${path}` placeholder (`data.project`, `data.array[0].prop`)
//! and an environment assignment (`DATA_PROJECT`, `DATA_ARRAY_0_PROP`).
//!
//! On top of the tree walk:
//! - process environment: `${env.<lowercased>}` / `ENV_<NAME>` / `$ENV_<NAME>`
//! - labels: `${label.<name>}` / `LABEL_<NAME>` / `$LABEL_<name>`
//! - well-known context fields: `$PROJECT`, `$TIMEUTCMS`, ... and the
//!   matching environment variables
//!
//! Substitution is a single left-to-right scan: a substituted value is
//! never scanned again, and unknown placeholders are left verbatim. Output is
//! stable under re-rendering only while no value itself holds `$` syntax.

use std::collections::BTreeMap;

use serde_json::Value;

use super::secrets::SecretFilter;
use crate::domain::EventContext;

/// Environment assignments for a script; names are unique, last write wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvAssignments {
    vars: BTreeMap<String, String>,
}

impl EnvAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn to_vec(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Visit every scalar leaf of `value` with its dotted/bracketed key path
pub fn walk_scalars<F>(value: &Value, path: &mut String, visit: &mut F)
where
    F: FnMut(&str, String),
{
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(key);
                walk_scalars(child, path, visit);
                path.truncate(len);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let len = path.len();
                path.push_str(&format!("[{}]", index));
                walk_scalars(child, path, visit);
                path.truncate(len);
            }
        }
        Value::String(s) => visit(path, s.clone()),
        Value::Number(n) => visit(path, n.to_string()),
        Value::Bool(b) => visit(path, b.to_string()),
        Value::Null => {}
    }
}

/// Normalize a key path into an environment variable name.
///
/// Uppercases and replaces every run of non-alphanumeric characters with a
/// single `_`; `data.array[0].prop` becomes `DATA_ARRAY_0_PROP`.
pub fn env_name(path: &str) -> String {
    let mut name = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_uppercase());
        } else if !name.ends_with('_') && !name.is_empty() {
            name.push('_');
        }
    }
    while name.ends_with('_') {
        name.pop();
    }
    name
}

/// Placeholder index and environment for one event
#[derive(Debug, Clone)]
pub struct PlaceholderEngine {
    /// `${...}` keys
    index: BTreeMap<String, String>,
    /// `$TOKEN` names, longest first
    legacy: Vec<(String, String)>,
    env: EnvAssignments,
}

impl PlaceholderEngine {
    /// Build the index for `ctx`.
    ///
    /// `event` is the full inbound event as JSON and `process_env` the
    /// variables of the running process; secrets are dropped before anything
    /// else sees them.
    pub fn new<I>(ctx: &EventContext, event: &Value, process_env: I, secrets: &SecretFilter) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut index = BTreeMap::new();
        let mut legacy = BTreeMap::new();
        let mut env = EnvAssignments::new();

        let mut path = String::new();
        walk_scalars(event, &mut path, &mut |key: &str, value: String| {
            let name = env_name(key);
            if !name.is_empty() {
                env.set(name, value.clone());
            }
            index.insert(key.to_string(), value);
        });

        for (name, value) in secrets.visible(process_env) {
            index.insert(format!("env.{}", name.to_lowercase()), value.clone());
            legacy.insert(format!("ENV_{}", name), value.clone());
            env.set(format!("ENV_{}", env_name(&name)), value);
        }

        for (key, value) in &ctx.labels {
            index.insert(format!("label.{}", key), value.clone());
            legacy.insert(format!("LABEL_{}", key), value.clone());
            env.set(format!("LABEL_{}", env_name(key)), value.clone());
        }

        for (name, value) in ctx.core_fields() {
            legacy.insert(name.to_string(), value.to_string());
            env.set(name, value);
        }

        let mut legacy: Vec<(String, String)> = legacy.into_iter().collect();
        legacy.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self { index, legacy, env }
    }

    /// Value of a `${...}` key
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(String::as_str)
    }

    /// Environment assignments for scripts
    pub fn env(&self) -> &EnvAssignments {
        &self.env
    }

    /// Substitute placeholders and return the text with the environment list
    pub fn render(&self, template: &str) -> (String, Vec<(String, String)>) {
        (self.render_text(template), self.env.to_vec())
    }

    /// Substitute all known placeholders in `template`
    pub fn render_text(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(inner) = after.strip_prefix('{') {
                if let Some(end) = inner.find('}') {
                    if let Some(value) = self.lookup(inner[..end].trim()) {
                        out.push_str(value);
                        rest = &inner[end + 1..];
                        continue;
                    }
                }
            } else if let Some((token, value)) = self.match_legacy(after) {
                out.push_str(value);
                rest = &after[token.len()..];
                continue;
            }

            out.push('$');
            rest = after;
        }

        out.push_str(rest);
        out
    }

    fn match_legacy(&self, text: &str) -> Option<(&str, &str)> {
        self.legacy
            .iter()
            .find(|(token, _)| text.starts_with(token.as_str()))
            .map(|(token, value)| (token.as_str(), value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventEnvelope;
    use serde_json::json;

    fn engine_for(data: Value, env: Vec<(&str, &str)>) -> PlaceholderEngine {
        let envelope: EventEnvelope = serde_json::from_value(json!({
            "id": "e-1",
            "type": "sh.keptn.event.deployment.finished",
            "source": "helm-service",
            "time": "2024-03-01T10:00:00Z",
            "shkeptncontext": "ctx-1",
            "data": data,
        }))
        .unwrap();
        let ctx = EventContext::from_envelope(&envelope).unwrap();
        let env = env
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>();
        PlaceholderEngine::new(&ctx, &envelope.to_value(), env, &SecretFilter::default())
    }

    #[test]
    fn test_replace_placeholders_recursively() {
        let engine = engine_for(
            json!({
                "project": "my-project",
                "my": {"property": "some-property"},
                "array": ["foo", {"prop": "bla"}]
            }),
            vec![],
        );

        let rendered = engine.render_text(
            "this should contain ${data.project} and ${data.my.property} and ${data.array[0]} and ${data.array[1].prop}",
        );
        assert_eq!(
            rendered,
            "this should contain my-project and some-property and foo and bla"
        );
    }

    #[test]
    fn test_env_names_from_tree_walk() {
        let engine = engine_for(
            json!({
                "project": "p",
                "problem": {"PID": "42"},
                "array": [{"prop": "bla"}],
                "count": 3,
                "enabled": true,
                "nothing": null
            }),
            vec![],
        );
        let env = engine.env();
        assert_eq!(env.get("DATA_PROJECT"), Some("p"));
        assert_eq!(env.get("DATA_PROBLEM_PID"), Some("42"));
        assert_eq!(env.get("DATA_ARRAY_0_PROP"), Some("bla"));
        assert_eq!(env.get("DATA_COUNT"), Some("3"));
        assert_eq!(env.get("DATA_ENABLED"), Some("true"));
        assert_eq!(env.get("SHKEPTNCONTEXT"), Some("ctx-1"));
        assert!(!env.contains("DATA_NOTHING"));
    }

    #[test]
    fn test_core_fields_in_env_and_legacy_tokens() {
        let engine = engine_for(
            json!({"project": "sockshop", "stage": "dev", "service": "carts"}),
            vec![],
        );
        let env = engine.env();
        assert_eq!(env.get("PROJECT"), Some("sockshop"));
        assert_eq!(env.get("CONTEXT"), Some("ctx-1"));
        assert_eq!(env.get("EVENT"), Some("sh.keptn.event.deployment.finished"));
        assert_eq!(env.get("TIMEUTCMS"), Some("1709287200000"));

        assert_eq!(
            engine.render_text("$PROJECT/$STAGE/$SERVICE at $TIMEUTCMS"),
            "sockshop/dev/carts at 1709287200000"
        );
    }

    #[test]
    fn test_longest_legacy_token_wins() {
        let engine = engine_for(
            json!({"project": "p", "deploymentURILocal": "http://local"}),
            vec![],
        );
        assert_eq!(engine.render_text("$DEPLOYMENTURILOCAL"), "http://local");
        assert_eq!(engine.render_text("$TIMEUTCMS").len(), 13);
    }

    #[test]
    fn test_labels_and_env() {
        let engine = engine_for(
            json!({"project": "p", "labels": {"buildId": "123"}}),
            vec![("TESTTOKEN", "MYTESTTOKENVALUE")],
        );
        assert_eq!(
            engine.render_text("${label.buildId} ${env.testtoken} $LABEL_buildId $ENV_TESTTOKEN"),
            "123 MYTESTTOKENVALUE 123 MYTESTTOKENVALUE"
        );
        assert_eq!(engine.env().get("LABEL_BUILDID"), Some("123"));
        assert_eq!(engine.env().get("ENV_TESTTOKEN"), Some("MYTESTTOKENVALUE"));
    }

    #[test]
    fn test_secrets_never_exposed() {
        let engine = engine_for(
            json!({"project": "p"}),
            vec![("SECRET_TOKEN", "s3cr3t"), ("secret_lower", "hidden")],
        );
        let rendered =
            engine.render_text("${env.secret_token} $ENV_SECRET_TOKEN ${env.secret_lower}");
        assert!(!rendered.contains("s3cr3t"));
        assert!(!rendered.contains("hidden"));
        assert!(engine.env().to_vec().iter().all(|(_, v)| v != "s3cr3t" && v != "hidden"));
        assert!(!engine.env().contains("ENV_SECRET_TOKEN"));
    }

    #[test]
    fn test_unresolved_placeholders_are_left_verbatim() {
        let engine = engine_for(json!({"project": "p"}), vec![]);
        assert_eq!(
            engine.render_text("${data.unknown} $UNKNOWN ${unterminated $ 5$"),
            "${data.unknown} $UNKNOWN ${unterminated $ 5$"
        );
    }

    #[test]
    fn test_render_is_idempotent() {
        let engine = engine_for(
            json!({"project": "sockshop", "labels": {"team": "a"}}),
            vec![("REGION", "eu")],
        );
        let template = "GET http://svc/${data.project}?team=${label.team}&r=$ENV_REGION&x=${data.nope}";
        let (once, env) = engine.render(template);
        assert_eq!(once, "GET http://svc/sockshop?team=a&r=eu&x=${data.nope}");
        assert_eq!(engine.render_text(&once), once);
        assert!(!env.is_empty());
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let engine = engine_for(json!({"project": "${data.stage}", "stage": "dev"}), vec![]);
        let once = engine.render_text("${data.project}");
        assert_eq!(once, "${data.stage}");
        // a value carrying placeholder syntax expands on the next render
        assert_eq!(engine.render_text(&once), "dev");
    }

    #[test]
    fn test_env_name_normalization() {
        assert_eq!(env_name("data.array[0].prop"), "DATA_ARRAY_0_PROP");
        assert_eq!(env_name("data.labels.my-label"), "DATA_LABELS_MY_LABEL");
        assert_eq!(env_name("shkeptncontext"), "SHKEPTNCONTEXT");
        assert_eq!(env_name("[0]"), "0");
    }
}
