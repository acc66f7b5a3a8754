//! Secret-to-environment-variable bindings.

use crate::config::KvEngine;
use secrecy::SecretString;

/// Request to expose the value at `(path, key)` as `env_var`.
#[derive(Debug, Clone)]
pub struct SecretBinding {
    /// Logical path of the secret
    pub path: String,
    /// Key inside the secret
    pub key: String,
    /// Environment variable the value is bound to
    pub env_var: String,
    /// Used when the path or key does not exist
    pub default_value: Option<SecretString>,
    /// Engine version overriding the configured one
    pub engine_version: Option<KvEngine>,
}

impl SecretBinding {
    /// Bind `key` of the secret at `path` to `env_var`.
    #[must_use]
    pub fn new(path: impl Into<String>, key: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            env_var: env_var.into(),
            default_value: None,
            engine_version: None,
        }
    }

    /// Fallback value for a missing path or key.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(SecretString::from(value.into()));
        self
    }

    /// Read this binding from a specific engine version.
    #[must_use]
    pub const fn with_engine_version(mut self, engine: KvEngine) -> Self {
        self.engine_version = Some(engine);
        self
    }
}

/// A binding that produced a value.
#[derive(Debug, Clone)]
pub struct BoundSecret {
    /// Environment variable name
    pub env_var: String,
    /// Bound value
    pub value: SecretString,
    /// Path it was read from
    pub path: String,
    /// Key it was read from
    pub key: String,
    /// Whether the binding's default was used
    pub from_default: bool,
}

/// A binding skipped because its secret was not found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBinding {
    /// Environment variable name
    pub env_var: String,
    /// Requested path
    pub path: String,
    /// Requested key
    pub key: String,
    /// Why nothing was bound
    pub reason: String,
}

/// Outcome of binding secrets for one run.
#[derive(Debug, Clone, Default)]
pub struct BindingReport {
    /// Bindings that produced a value, in request order
    pub bound: Vec<BoundSecret>,
    /// Bindings left unset, in request order
    pub missing: Vec<MissingBinding>,
}

impl BindingReport {
    /// Value bound to `env_var`.
    #[must_use]
    pub fn get(&self, env_var: &str) -> Option<&SecretString> {
        self.bound
            .iter()
            .find(|b| b.env_var == env_var)
            .map(|b| &b.value)
    }

    /// Whether `env_var` received a value.
    #[must_use]
    pub fn contains(&self, env_var: &str) -> bool {
        self.get(env_var).is_some()
    }

    /// Bound variable names, in request order.
    pub fn env_vars(&self) -> impl Iterator<Item = &str> {
        self.bound.iter().map(|b| b.env_var.as_str())
    }
}

/// Bindings sharing one secret read.
#[derive(Debug)]
pub(crate) struct PathGroup<'a> {
    pub path: &'a str,
    pub engine: KvEngine,
    pub bindings: Vec<&'a SecretBinding>,
}

/// Group bindings by `(path, engine)` in order of first appearance, so that
/// every distinct secret is read once.
pub(crate) fn group_by_path(bindings: &[SecretBinding], default_engine: KvEngine) -> Vec<PathGroup<'_>> {
    let mut groups: Vec<PathGroup<'_>> = Vec::new();
    for binding in bindings {
        let engine = binding.engine_version.unwrap_or(default_engine);
        match groups
            .iter_mut()
            .find(|g| g.path == binding.path && g.engine == engine)
        {
            Some(group) => group.bindings.push(binding),
            None => groups.push(PathGroup {
                path: &binding.path,
                engine,
                bindings: vec![binding],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_group_preserves_first_appearance_order() {
        let bindings = vec![
            SecretBinding::new("secret/b", "user", "B_USER"),
            SecretBinding::new("secret/a", "token", "A_TOKEN"),
            SecretBinding::new("secret/b", "pass", "B_PASS"),
            SecretBinding::new("secret/a", "token", "A_TOKEN_V2").with_engine_version(KvEngine::V2),
        ];

        let groups = group_by_path(&bindings, KvEngine::V1);
        let summary: Vec<_> = groups
            .iter()
            .map(|g| (g.path, g.engine, g.bindings.len()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("secret/b", KvEngine::V1, 2),
                ("secret/a", KvEngine::V1, 1),
                ("secret/a", KvEngine::V2, 1),
            ]
        );
    }

    #[test]
    fn test_report_lookup() {
        let report = BindingReport {
            bound: vec![BoundSecret {
                env_var: "DB_PASS".to_string(),
                value: SecretString::from("pw"),
                path: "database/creds/ro".to_string(),
                key: "password".to_string(),
                from_default: false,
            }],
            missing: Vec::new(),
        };
        assert_eq!(report.get("DB_PASS").unwrap().expose_secret(), "pw");
        assert!(!report.contains("OTHER"));
        assert_eq!(report.env_vars().collect::<Vec<_>>(), vec!["DB_PASS"]);
    }

    #[test]
    fn test_binding_debug_hides_default() {
        let binding = SecretBinding::new("p", "k", "E").with_default("fallback-secret");
        assert!(!format!("{binding:?}").contains("fallback-secret"));
    }
}
