use crate::{Condition, LabelSelector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares that a subject may only be admitted once its dependencies exist.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "deps.io",
    version = "v1",
    kind = "DependencyRule",
    status = "DependencyRuleStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRuleSpec {
    pub subject: SubjectRef,
    pub depends_on: Vec<DependencyRef>,
    #[serde(default)]
    pub enforcement: Enforcement,
}

/// Selects the resource(s) a rule applies to, either by name or by labels.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    /// Empty means the core API group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRef {
    /// Empty means the core API group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Enforcement {
    #[default]
    Strict,
    Warn,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRuleStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforcement_defaults_to_strict() {
        let spec: DependencyRuleSpec = serde_json::from_value(serde_json::json!({
            "subject": { "apiGroup": "apps", "kind": "Deployment", "name": "web" },
            "dependsOn": [{ "kind": "ConfigMap", "name": "cfg" }],
        }))
        .expect("spec must deserialize");

        assert_eq!(spec.enforcement, Enforcement::Strict);
        assert_eq!(spec.subject.api_group, "apps");
        assert_eq!(spec.subject.name.as_deref(), Some("web"));
        assert_eq!(
            spec.depends_on,
            vec![DependencyRef {
                api_group: String::new(),
                kind: "ConfigMap".to_string(),
                name: "cfg".to_string(),
            }]
        );
    }

    #[test]
    fn deserializes_selector_subject() {
        let spec: DependencyRuleSpec = serde_json::from_value(serde_json::json!({
            "subject": {
                "kind": "Pod",
                "selector": { "matchLabels": { "app": "web" } },
            },
            "dependsOn": [{ "kind": "Secret", "name": "tls" }],
            "enforcement": "Warn",
        }))
        .expect("spec must deserialize");

        assert_eq!(spec.enforcement, Enforcement::Warn);
        assert!(spec.subject.name.is_none());
        assert!(spec.subject.selector.is_some());
    }
}
