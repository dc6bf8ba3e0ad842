use crate::rule::DependencyRef;

/// The state of a single dependency as currently known.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The dependency exists. `ready` is only set for objects that expose a
    /// recognized readiness condition.
    Found { ready: Option<bool> },

    /// No such object is known.
    NotFound,

    /// The state of the dependency's kind is not known well enough to answer,
    /// e.g. because its watch has not synced or has been failing for too long.
    Unavailable,
}

/// Resolves dependencies against known cluster state.
///
/// Implementations must not block on remote calls: resolution happens on the
/// admission path.
pub trait ResolveDependency {
    /// Resolves `dependency` in `namespace` if its kind is namespaced, or at
    /// cluster scope otherwise.
    fn resolve(&self, dependency: &DependencyRef, namespace: &str) -> Resolution;
}

/// Whether a dependency that exists but reports not-ready satisfies a rule.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Existing dependencies that report not-ready are unmet.
    #[default]
    Require,

    /// Existence alone satisfies a dependency.
    Ignore,
}

// === impl Resolution ===

impl Resolution {
    pub fn found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    pub fn ready_hint(&self) -> Option<bool> {
        match self {
            Self::Found { ready } => *ready,
            _ => None,
        }
    }
}

// === impl ReadinessPolicy ===

impl std::str::FromStr for ReadinessPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "require" => Ok(Self::Require),
            "ignore" => Ok(Self::Ignore),
            s => Err(anyhow::anyhow!("invalid readiness policy: {}", s)),
        }
    }
}

impl<T: ResolveDependency + ?Sized> ResolveDependency for &T {
    fn resolve(&self, dependency: &DependencyRef, namespace: &str) -> Resolution {
        (**self).resolve(dependency, namespace)
    }
}

impl<T: ResolveDependency + ?Sized> ResolveDependency for std::sync::Arc<T> {
    fn resolve(&self, dependency: &DependencyRef, namespace: &str) -> Resolution {
        (**self).resolve(dependency, namespace)
    }
}
