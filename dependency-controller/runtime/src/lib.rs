#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use dependency_controller_core as core;
pub use dependency_controller_k8s_api as k8s;
pub use dependency_controller_k8s_index as index;
pub use dependency_controller_k8s_status as status;

mod admission;
mod args;
mod index_list;
mod lease;
mod watches;

pub use self::args::Args;

/// The decision engine, backed by the shared rule index and object cache.
type Engine = core::Engine<RuleLookup, ObjectResolver>;

#[derive(Clone, Debug)]
struct RuleLookup(index::SharedIndex);

#[derive(Clone, Debug)]
struct ObjectResolver(index::SharedCache);

impl core::LookupRules for RuleLookup {
    fn lookup_by_subject_kind(&self, kind: &core::GroupKind) -> core::RuleSet {
        self.0.read().lookup_by_subject_kind(kind)
    }
}

impl core::ResolveDependency for ObjectResolver {
    fn resolve(&self, dependency: &core::DependencyRef, namespace: &str) -> core::Resolution {
        core::ResolveDependency::resolve(&*self.0.read(), dependency, namespace)
    }
}
