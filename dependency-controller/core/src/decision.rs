use crate::{
    resolve::{ReadinessPolicy, Resolution, ResolveDependency},
    rule::{Candidate, DependencyRef, EnforcementMode, GroupKind, Rule, RuleId},
};
use std::{fmt, sync::Arc};

/// An ordered snapshot of the rules governing a kind.
pub type RuleSet = Arc<[Arc<Rule>]>;

/// Looks up active rules by the kind of subject they govern.
pub trait LookupRules {
    /// Returns the rules whose subject targets `kind`, in index insertion order.
    fn lookup_by_subject_kind(&self, kind: &GroupKind) -> RuleSet;
}

/// Decides whether candidates may be admitted.
#[derive(Clone, Debug)]
pub struct Engine<L, R> {
    rules: L,
    resolver: R,
    readiness: ReadinessPolicy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Allow,
    AllowWithWarning,
    Deny,
}

/// Why a dependency is unmet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Unmet {
    Missing,
    NotReady,
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reason {
    pub rule: RuleId,
    pub enforcement: EnforcementMode,
    pub dependency: DependencyRef,
    pub unmet: Unmet,
}

/// A rule that governed a decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluated {
    pub rule: RuleId,
    pub enforcement: EnforcementMode,
    pub satisfied: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,

    /// Unmet dependencies, grouped by rule in evaluation order.
    pub reasons: Vec<Reason>,

    /// Every rule that governed the candidate, in evaluation order.
    pub evaluated: Vec<Evaluated>,
}

// === impl Engine ===

impl<L, R> Engine<L, R>
where
    L: LookupRules,
    R: ResolveDependency,
{
    pub fn new(rules: L, resolver: R, readiness: ReadinessPolicy) -> Self {
        Self {
            rules,
            resolver,
            readiness,
        }
    }

    pub fn decide(&self, candidate: &Candidate) -> Decision {
        let rules = self.rules.lookup_by_subject_kind(&candidate.group_kind);

        let mut reasons = Vec::new();
        let mut evaluated = Vec::new();
        let mut outcome = Outcome::Allow;
        for rule in rules.iter().filter(|r| r.applies_to(candidate)) {
            let unmet = self.evaluate(rule, candidate);
            evaluated.push(Evaluated {
                rule: rule.id.clone(),
                enforcement: rule.enforcement,
                satisfied: unmet.is_empty(),
            });
            if unmet.is_empty() {
                continue;
            }

            outcome = outcome.max(match rule.enforcement {
                EnforcementMode::Strict => Outcome::Deny,
                EnforcementMode::Warn => Outcome::AllowWithWarning,
            });
            reasons.extend(unmet.into_iter().map(|(dependency, unmet)| Reason {
                rule: rule.id.clone(),
                enforcement: rule.enforcement,
                dependency,
                unmet,
            }));
        }

        tracing::debug!(
            kind = %candidate.group_kind,
            name = %candidate.name,
            ?outcome,
            rules = evaluated.len(),
            "Decided"
        );
        Decision {
            outcome,
            reasons,
            evaluated,
        }
    }

    /// Resolves a rule's dependencies in declaration order.
    ///
    /// Strict rules stop at the first unmet dependency; warn-mode rules
    /// report every unmet dependency.
    fn evaluate(&self, rule: &Rule, candidate: &Candidate) -> Vec<(DependencyRef, Unmet)> {
        let ns = rule.scope_namespace(candidate);
        let mut unmet = Vec::new();
        for dependency in &rule.depends_on {
            let status = match self.resolver.resolve(dependency, ns) {
                Resolution::Found { ready: Some(false) }
                    if self.readiness == ReadinessPolicy::Require =>
                {
                    Some(Unmet::NotReady)
                }
                Resolution::Found { .. } => None,
                Resolution::NotFound => Some(Unmet::Missing),
                Resolution::Unavailable => Some(Unmet::Unavailable),
            };

            if let Some(status) = status {
                unmet.push((dependency.clone(), status));
                if rule.enforcement == EnforcementMode::Strict {
                    break;
                }
            }
        }
        unmet
    }
}

// === impl Outcome ===

impl Outcome {
    fn rank(&self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::AllowWithWarning => 1,
            Self::Deny => 2,
        }
    }

    /// Returns the more restrictive of the two outcomes.
    pub fn max(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::AllowWithWarning => "allow_with_warning",
            Self::Deny => "deny",
        }
    }
}

// === impl Unmet ===

impl fmt::Display for Unmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "missing",
            Self::NotReady => "not ready",
            Self::Unavailable => "unavailable",
        })
    }
}

// === impl Reason ===

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dependency {} is {} (required by DependencyRule {})",
            self.dependency, self.unmet, self.rule
        )
    }
}

// === impl Decision ===

impl Decision {
    /// Returns the unmet dependencies attributed to a rule.
    pub fn reasons_for<'a>(&'a self, rule: &'a RuleId) -> impl Iterator<Item = &'a Reason> + 'a {
        self.reasons.iter().filter(move |r| r.rule == *rule)
    }
}
