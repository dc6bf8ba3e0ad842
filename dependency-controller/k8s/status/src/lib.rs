#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod conditions;
mod index;


pub use self::{
    conditions::Verdict,
    index::{Controller, ControllerMetrics, Index, SharedIndex, Update, FIELD_MANAGER},
};
