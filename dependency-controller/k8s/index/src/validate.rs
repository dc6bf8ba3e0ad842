use dependency_controller_core::{
    DependencyRef, EnforcementMode, GroupKind, Rule, RuleId, SubjectRef, SubjectTarget,
};
use dependency_controller_k8s_api::{self as k8s, labels};
use thiserror::Error;

/// Describes why a `DependencyRule` cannot be enforced.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidRule {
    #[error("subject kind must be set")]
    MissingSubjectKind,

    #[error("subject must set one of name or selector")]
    MissingSubjectTarget,

    #[error("subject name and selector are mutually exclusive")]
    AmbiguousSubject,

    #[error("invalid subject selector: {0}")]
    Selector(#[from] labels::ParseError),

    #[error("dependsOn must list at least one dependency")]
    NoDependencies,

    #[error("dependsOn[{0}] must set kind and name")]
    IncompleteDependency(usize),
}

/// Converts a `DependencyRule` spec into an enforceable rule.
pub fn rule(
    namespace: impl ToString,
    name: impl ToString,
    spec: &k8s::DependencyRuleSpec,
) -> Result<Rule, InvalidRule> {
    let subject = subject(&spec.subject)?;

    if spec.depends_on.is_empty() {
        return Err(InvalidRule::NoDependencies);
    }
    let depends_on = spec
        .depends_on
        .iter()
        .enumerate()
        .map(|(i, dep)| {
            if dep.kind.is_empty() || dep.name.is_empty() {
                return Err(InvalidRule::IncompleteDependency(i));
            }
            Ok(DependencyRef {
                group_kind: GroupKind::new(&dep.api_group, &dep.kind),
                name: dep.name.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let enforcement = match spec.enforcement {
        k8s::Enforcement::Strict => EnforcementMode::Strict,
        k8s::Enforcement::Warn => EnforcementMode::Warn,
    };

    Ok(Rule {
        id: RuleId::new(namespace, name),
        subject,
        depends_on,
        enforcement,
    })
}

fn subject(subject: &k8s::SubjectRef) -> Result<SubjectRef, InvalidRule> {
    if subject.kind.is_empty() {
        return Err(InvalidRule::MissingSubjectKind);
    }

    let name = subject.name.as_deref().filter(|n| !n.is_empty());
    let target = match (name, subject.selector.as_ref()) {
        (Some(name), None) => SubjectTarget::Name(name.to_string()),
        (None, Some(selector)) => SubjectTarget::Selector(labels::Selector::try_from(selector)?),
        (Some(_), Some(_)) => return Err(InvalidRule::AmbiguousSubject),
        (None, None) => return Err(InvalidRule::MissingSubjectTarget),
    };

    Ok(SubjectRef {
        group_kind: GroupKind::new(&subject.api_group, &subject.kind),
        target,
    })
}
