use dependency_controller_k8s_api::labels::{Labels, Selector};
use std::fmt;

/// Identifies a rule by its namespace and name.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct RuleId {
    pub namespace: String,
    pub name: String,
}

/// An API group and kind. An empty group is the core API group.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

/// Selects the objects a rule governs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectRef {
    pub group_kind: GroupKind,
    pub target: SubjectTarget,
}

/// A subject is addressed either by exact name or by label selector, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectTarget {
    Name(String),
    Selector(Selector),
}

/// References a single dependency by exact name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DependencyRef {
    pub group_kind: GroupKind,
    pub name: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum EnforcementMode {
    /// Unmet dependencies block admission.
    #[default]
    Strict,

    /// Unmet dependencies are reported but admission proceeds.
    Warn,
}

/// A validated dependency rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub subject: SubjectRef,

    /// Never empty.
    pub depends_on: Vec<DependencyRef>,
    pub enforcement: EnforcementMode,
}

/// A snapshot of the object under admission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub group_kind: GroupKind,
    pub name: String,
    pub namespace: Option<String>,
    pub labels: Labels,
}

// === impl RuleId ===

impl RuleId {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl GroupKind ===

impl GroupKind {
    pub fn new(group: impl ToString, kind: impl ToString) -> Self {
        Self {
            group: group.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn is_core(&self) -> bool {
        self.group.is_empty()
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_core() {
            return f.write_str(&self.kind);
        }
        write!(f, "{}.{}", self.kind, self.group)
    }
}

// === impl SubjectRef ===

impl SubjectRef {
    /// Returns true if the candidate is the object (or one of the objects) this
    /// reference selects.
    pub fn matches(&self, candidate: &Candidate) -> bool {
        if self.group_kind != candidate.group_kind {
            return false;
        }

        match &self.target {
            SubjectTarget::Name(name) => *name == candidate.name,
            SubjectTarget::Selector(selector) => selector.matches(&candidate.labels),
        }
    }
}

// === impl DependencyRef ===

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_kind, self.name)
    }
}

// === impl Rule ===

impl Rule {
    /// Returns true if this rule governs the candidate.
    ///
    /// Rules only govern namespaced candidates in their own namespace.
    /// Cluster-scoped candidates may be governed by a rule in any namespace.
    pub fn applies_to(&self, candidate: &Candidate) -> bool {
        if let Some(ns) = candidate.namespace.as_deref() {
            if ns != self.id.namespace {
                return false;
            }
        }
        self.subject.matches(candidate)
    }

    /// The namespace in which namespaced dependencies are resolved for the
    /// given candidate.
    pub fn scope_namespace<'a>(&'a self, candidate: &'a Candidate) -> &'a str {
        candidate
            .namespace
            .as_deref()
            .unwrap_or(self.id.namespace.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dependency_controller_k8s_api::labels::{Expression, Operator};
    use std::iter::FromIterator;

    fn deployment(ns: Option<&str>, name: &str, labels: Labels) -> Candidate {
        Candidate {
            group_kind: GroupKind::new("apps", "Deployment"),
            name: name.to_string(),
            namespace: ns.map(Into::into),
            labels,
        }
    }

    fn rule(target: SubjectTarget) -> Rule {
        Rule {
            id: RuleId::new("ns-0", "rule-0"),
            subject: SubjectRef {
                group_kind: GroupKind::new("apps", "Deployment"),
                target,
            },
            depends_on: vec![DependencyRef {
                group_kind: GroupKind::new("", "ConfigMap"),
                name: "cfg".to_string(),
            }],
            enforcement: EnforcementMode::Strict,
        }
    }

    #[test]
    fn name_subject_matches_exact_name() {
        let rule = rule(SubjectTarget::Name("web".to_string()));
        assert!(rule.applies_to(&deployment(Some("ns-0"), "web", Labels::default())));
        assert!(!rule.applies_to(&deployment(Some("ns-0"), "api", Labels::default())));
    }

    #[test]
    fn subject_requires_group_and_kind() {
        let rule = rule(SubjectTarget::Name("web".to_string()));
        let mut candidate = deployment(Some("ns-0"), "web", Labels::default());
        candidate.group_kind = GroupKind::new("extensions", "Deployment");
        assert!(!rule.applies_to(&candidate));

        candidate.group_kind = GroupKind::new("apps", "StatefulSet");
        assert!(!rule.applies_to(&candidate));
    }

    #[test]
    fn selector_subject_matches_labels() {
        let rule = rule(SubjectTarget::Selector(Selector::from_iter(Some(
            Expression::new("tier", Operator::In, ["web", "edge"]),
        ))));
        assert!(rule.applies_to(&deployment(
            Some("ns-0"),
            "a",
            Labels::from_iter(Some(("tier", "edge")))
        )));
        assert!(!rule.applies_to(&deployment(
            Some("ns-0"),
            "a",
            Labels::from_iter(Some(("tier", "db")))
        )));
    }

    #[test]
    fn empty_selector_matches_every_object_of_kind() {
        let rule = rule(SubjectTarget::Selector(Selector::default()));
        assert!(rule.applies_to(&deployment(Some("ns-0"), "any", Labels::default())));
    }

    #[test]
    fn rules_are_namespace_scoped() {
        let rule = rule(SubjectTarget::Name("web".to_string()));
        let other = deployment(Some("ns-1"), "web", Labels::default());
        assert!(!rule.applies_to(&other));

        let cluster_scoped = deployment(None, "web", Labels::default());
        assert!(rule.applies_to(&cluster_scoped));
        assert_eq!(rule.scope_namespace(&cluster_scoped), "ns-0");
    }

    #[test]
    fn displays_refs() {
        let cm = DependencyRef {
            group_kind: GroupKind::new("", "ConfigMap"),
            name: "cfg".to_string(),
        };
        assert_eq!(cm.to_string(), "ConfigMap/cfg");

        let cert = DependencyRef {
            group_kind: GroupKind::new("cert-manager.io", "Certificate"),
            name: "tls".to_string(),
        };
        assert_eq!(cert.to_string(), "Certificate.cert-manager.io/tls");
    }
}
