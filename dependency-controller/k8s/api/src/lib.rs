#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod dependency_rule;
pub mod labels;

pub use self::{
    dependency_rule::{
        DependencyRef, DependencyRule, DependencyRuleSpec, DependencyRuleStatus, Enforcement,
        SubjectRef,
    },
    labels::Labels,
};
pub use k8s_openapi::{
    api::{self, apps::v1::Deployment, coordination::v1::Lease},
    apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, Time},
};
pub use kube::{
    api::{Api, DynamicObject, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    core::{ApiResource, GroupVersionKind},
    discovery::{ApiCapabilities, Discovery, Scope},
    runtime::watcher,
    Client, Error,
};
