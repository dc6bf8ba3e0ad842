//! Dependency controller indexes
//!
//! Two indexes back admission decisions, both fed by watches and read
//! concurrently by the admission server:
//!
//! - [`rules::Index`] holds validated `DependencyRule` resources, grouped by
//!   the kind of subject they govern. Rules that fail validation are tracked
//!   separately so their status can be reported, but they are never enforced.
//! - [`objects::Cache`] holds the existence and readiness of each object whose
//!   kind some rule depends on. A watch is started for each such kind the
//!   first time a rule references it.
//!
//! ```text
//! [ DependencyRule ] -> [ rules::Index ] --(new kinds)--> [ objects::Cache ]
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
pub mod objects;
pub mod rules;
pub mod validate;

pub use self::{
    objects::{Cache, Scope, SharedCache},
    rules::{Index, SharedIndex},
    validate::InvalidRule,
};
