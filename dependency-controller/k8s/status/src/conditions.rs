use dependency_controller_core::EnforcementMode;
use dependency_controller_k8s_api::{Condition, Time};

pub const AVAILABLE: &str = "Available";
pub const PROGRESSING: &str = "Progressing";
pub const DEGRADED: &str = "Degraded";

pub const DEPENDENCIES_SATISFIED: &str = "DependenciesSatisfied";
pub const UNMET_DEPENDENCIES: &str = "UnmetDependencies";
pub const UNMET_DEPENDENCIES_WARN: &str = "UnmetDependenciesWarn";
pub const INVALID_RULE: &str = "InvalidRule";
pub const RULE_ACCEPTED: &str = "RuleAccepted";

/// The most recent verdict for a rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The rule is valid but has not yet governed an admission request.
    Accepted,
    Satisfied,
    Unsatisfied {
        enforcement: EnforcementMode,
        message: String,
    },
    Invalid(String),
}

/// The desired state of a single condition, without a transition time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Desired {
    pub type_: &'static str,
    pub status: bool,
    pub reason: &'static str,
    pub message: String,
}

impl Verdict {
    /// Returns the conditions that express this verdict.
    pub(crate) fn conditions(&self) -> [Desired; 3] {
        match self {
            Self::Accepted => {
                let message = "Rule is valid";
                [
                    desired(AVAILABLE, false, RULE_ACCEPTED, message),
                    desired(PROGRESSING, false, RULE_ACCEPTED, message),
                    desired(DEGRADED, false, RULE_ACCEPTED, message),
                ]
            }
            Self::Satisfied => {
                let message = "All dependencies are satisfied";
                [
                    desired(AVAILABLE, true, DEPENDENCIES_SATISFIED, message),
                    desired(PROGRESSING, false, DEPENDENCIES_SATISFIED, message),
                    desired(DEGRADED, false, DEPENDENCIES_SATISFIED, message),
                ]
            }
            Self::Unsatisfied {
                enforcement: EnforcementMode::Strict,
                message,
            } => [
                desired(AVAILABLE, false, UNMET_DEPENDENCIES, message),
                desired(PROGRESSING, false, UNMET_DEPENDENCIES, message),
                desired(DEGRADED, true, UNMET_DEPENDENCIES, message),
            ],
            Self::Unsatisfied {
                enforcement: EnforcementMode::Warn,
                message,
            } => [
                desired(AVAILABLE, false, UNMET_DEPENDENCIES_WARN, message),
                desired(PROGRESSING, true, UNMET_DEPENDENCIES_WARN, message),
                desired(DEGRADED, false, UNMET_DEPENDENCIES_WARN, message),
            ],
            Self::Invalid(message) => [
                desired(AVAILABLE, false, INVALID_RULE, message),
                desired(PROGRESSING, false, INVALID_RULE, message),
                desired(DEGRADED, true, INVALID_RULE, message),
            ],
        }
    }
}

fn desired(type_: &'static str, status: bool, reason: &'static str, message: &str) -> Desired {
    Desired {
        type_,
        status,
        reason,
        message: message.to_string(),
    }
}

/// Merges a desired condition into `conditions`, returning true if anything
/// changed.
///
/// The transition time only moves when the condition's status changes.
pub(crate) fn set(
    conditions: &mut Vec<Condition>,
    desired: Desired,
    observed_generation: Option<i64>,
    now: &Time,
) -> bool {
    let status = if desired.status { "True" } else { "False" };

    let Some(current) = conditions.iter_mut().find(|c| c.type_ == desired.type_) else {
        conditions.push(Condition {
            type_: desired.type_.to_string(),
            status: status.to_string(),
            reason: desired.reason.to_string(),
            message: desired.message,
            observed_generation,
            last_transition_time: now.clone(),
        });
        return true;
    };

    let mut changed = false;
    if current.status != status {
        current.status = status.to_string();
        current.last_transition_time = now.clone();
        changed = true;
    }
    if current.reason != desired.reason {
        current.reason = desired.reason.to_string();
        changed = true;
    }
    if current.message != desired.message {
        current.message = desired.message;
        changed = true;
    }
    if observed_generation.is_some() && current.observed_generation != observed_generation {
        current.observed_generation = observed_generation;
        changed = true;
    }
    changed
}

/// Returns true if the condition of the given type is present with the given
/// reason.
pub(crate) fn has_reason(conditions: &[Condition], type_: &str, reason: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.reason == reason)
}
