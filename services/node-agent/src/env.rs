//! Container environment resolution.
//!
//! Providers receive pods whose environment is fully resolved: every variable
//! carries a literal value, field references have been read from the pod, and
//! `$(VAR)` references have been expanded.

use std::collections::HashMap;

use thiserror::Error;
use vnode_model::{Container, EnvVar, Pod};

/// Invalid environment configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("container {container}: environment variable with empty name")]
    EmptyName { container: String },

    #[error("container {container}: {name} sets both value and valueFrom")]
    Conflicting { container: String, name: String },

    #[error("container {container}: {name} has a valueFrom without a source")]
    EmptySource { container: String, name: String },

    #[error("container {container}: {name} references unsupported field path '{path}'")]
    UnsupportedFieldPath {
        container: String,
        name: String,
        path: String,
    },
}

/// Return a copy of `pod` with every container's environment resolved.
pub fn resolve_environment(pod: &Pod) -> Result<Pod, EnvError> {
    let mut resolved = pod.clone();
    for container in &mut resolved.spec.containers {
        container.env = resolve_container(pod, container)?;
    }
    Ok(resolved)
}

fn resolve_container(pod: &Pod, container: &Container) -> Result<Vec<EnvVar>, EnvError> {
    let mut defined: HashMap<String, String> = HashMap::new();
    let mut env = Vec::with_capacity(container.env.len());

    for var in &container.env {
        if var.name.is_empty() {
            return Err(EnvError::EmptyName {
                container: container.name.clone(),
            });
        }

        let value = match (&var.value, &var.value_from) {
            (Some(_), Some(_)) => {
                return Err(EnvError::Conflicting {
                    container: container.name.clone(),
                    name: var.name.clone(),
                })
            }
            (Some(value), None) => expand(value, &defined),
            (None, Some(source)) => {
                let field = source.field_ref.as_ref().ok_or_else(|| EnvError::EmptySource {
                    container: container.name.clone(),
                    name: var.name.clone(),
                })?;
                field_value(pod, &field.field_path).ok_or_else(|| {
                    EnvError::UnsupportedFieldPath {
                        container: container.name.clone(),
                        name: var.name.clone(),
                        path: field.field_path.clone(),
                    }
                })?
            }
            (None, None) => String::new(),
        };

        defined.insert(var.name.clone(), value.clone());
        env.push(EnvVar::literal(var.name.clone(), value));
    }

    Ok(env)
}

fn field_value(pod: &Pod, path: &str) -> Option<String> {
    match path {
        "metadata.name" => Some(pod.metadata.name.clone()),
        "metadata.namespace" => Some(pod.metadata.namespace.clone()),
        "metadata.uid" => Some(pod.metadata.uid.clone()),
        "spec.nodeName" => Some(pod.spec.node_name.clone().unwrap_or_default()),
        "spec.restartPolicy" => Some(pod.spec.restart_policy.to_string()),
        _ => None,
    }
}

/// Expand `$(VAR)` references against `vars`.
///
/// `$$` yields a literal `$`; unknown or unterminated references are kept
/// as written.
fn expand(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(stripped) = after.strip_prefix('$') {
            out.push('$');
            rest = stripped;
        } else if let Some(body) = after.strip_prefix('(') {
            match body.find(')') {
                Some(end) => {
                    let name = &body[..end];
                    match vars.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push_str("$(");
                            out.push_str(name);
                            out.push(')');
                        }
                    }
                    rest = &body[end + 1..];
                }
                None => {
                    out.push_str("$(");
                    rest = body;
                }
            }
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use vnode_model::{EnvVarSource, RestartPolicy};
    use vnode_testing::{dummy_pod, TEST_NODE_NAME};

    fn pod_with_env(env: Vec<EnvVar>) -> Pod {
        let mut pod = dummy_pod("nginx-0-a", &["bar"]);
        pod.spec.containers[0].env = env;
        pod
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("$(HOST):8080", "db.local:8080")]
    #[case("$(HOST)$(HOST)", "db.localdb.local")]
    #[case("$$(HOST)", "$(HOST)")]
    #[case("$(MISSING)", "$(MISSING)")]
    #[case("cost: $5", "cost: $5")]
    #[case("$(HOST", "$(HOST")]
    fn test_expand(#[case] input: &str, #[case] expected: &str) {
        let vars = HashMap::from([("HOST".to_string(), "db.local".to_string())]);
        assert_eq!(expand(input, &vars), expected);
    }

    #[test]
    fn test_field_refs_are_resolved() {
        let mut pod = pod_with_env(vec![
            EnvVar::from_field("POD_NAME", "metadata.name"),
            EnvVar::from_field("POD_NAMESPACE", "metadata.namespace"),
            EnvVar::from_field("POD_UID", "metadata.uid"),
            EnvVar::from_field("NODE", "spec.nodeName"),
            EnvVar::from_field("POLICY", "spec.restartPolicy"),
        ]);
        pod.spec.restart_policy = RestartPolicy::Never;

        let resolved = resolve_environment(&pod).unwrap();
        let env = &resolved.spec.containers[0].env;

        assert_eq!(env[0], EnvVar::literal("POD_NAME", "nginx-0-a"));
        assert_eq!(env[1], EnvVar::literal("POD_NAMESPACE", "default"));
        assert_eq!(env[2], EnvVar::literal("POD_UID", pod.uid()));
        assert_eq!(env[3], EnvVar::literal("NODE", TEST_NODE_NAME));
        assert_eq!(env[4], EnvVar::literal("POLICY", "Never"));
    }

    #[test]
    fn test_references_only_see_earlier_vars() {
        let pod = pod_with_env(vec![
            EnvVar::literal("URL", "http://$(HOST)/$(NAME)"),
            EnvVar::from_field("NAME", "metadata.name"),
            EnvVar::literal("SELF", "$(NAME)-1"),
        ]);

        let resolved = resolve_environment(&pod).unwrap();
        let env = &resolved.spec.containers[0].env;

        assert_eq!(env[0].value.as_deref(), Some("http://$(HOST)/$(NAME)"));
        assert_eq!(env[2].value.as_deref(), Some("nginx-0-a-1"));
    }

    #[test]
    fn test_unset_var_resolves_to_empty() {
        let pod = pod_with_env(vec![EnvVar {
            name: "EMPTY".to_string(),
            ..Default::default()
        }]);

        let resolved = resolve_environment(&pod).unwrap();
        assert_eq!(resolved.spec.containers[0].env[0], EnvVar::literal("EMPTY", ""));
    }

    #[test]
    fn test_invalid_configurations_are_rejected() {
        let empty_name = pod_with_env(vec![EnvVar::literal("", "x")]);
        assert_eq!(
            resolve_environment(&empty_name).unwrap_err(),
            EnvError::EmptyName {
                container: "bar".to_string()
            }
        );

        let conflicting = pod_with_env(vec![EnvVar {
            name: "BOTH".to_string(),
            value: Some("x".to_string()),
            value_from: Some(EnvVarSource::default()),
        }]);
        assert!(matches!(
            resolve_environment(&conflicting),
            Err(EnvError::Conflicting { .. })
        ));

        let no_source = pod_with_env(vec![EnvVar {
            name: "NONE".to_string(),
            value: None,
            value_from: Some(EnvVarSource::default()),
        }]);
        assert!(matches!(
            resolve_environment(&no_source),
            Err(EnvError::EmptySource { .. })
        ));

        let unsupported = pod_with_env(vec![EnvVar::from_field("IP", "status.podIP")]);
        assert_eq!(
            resolve_environment(&unsupported).unwrap_err(),
            EnvError::UnsupportedFieldPath {
                container: "bar".to_string(),
                name: "IP".to_string(),
                path: "status.podIP".to_string(),
            }
        );
    }
}
