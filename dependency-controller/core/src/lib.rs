#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod decision;
pub mod resolve;
pub mod rule;

pub use self::{
    decision::{Decision, Engine, Evaluated, LookupRules, Outcome, Reason, RuleSet, Unmet},
    resolve::{ReadinessPolicy, Resolution, ResolveDependency},
    rule::{
        Candidate, DependencyRef, EnforcementMode, GroupKind, Rule, RuleId, SubjectRef,
        SubjectTarget,
    },
};
