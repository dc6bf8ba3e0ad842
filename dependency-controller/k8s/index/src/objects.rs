//! A watch-fed cache of the objects that rules depend on.
//!
//! One store is kept per dependency kind. Stores are written only by the
//! kind's watch task and read by admission requests, which never wait on the
//! API server: when a store can't vouch for its contents, lookups resolve as
//! `Unavailable` so the decision engine can apply its degraded-mode policy.

use ahash::AHashMap as HashMap;
use dependency_controller_core::{DependencyRef, GroupKind, Resolution, ResolveDependency};
use dependency_controller_k8s_api::{watcher, DynamicObject, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

pub type SharedCache = Arc<RwLock<Cache>>;

#[derive(Debug)]
pub struct Cache {
    kinds: HashMap<GroupKind, KindStore>,

    /// How long a failing watch may go without recovering before its store
    /// is considered stale.
    max_staleness: Duration,

    /// Condition types that signal readiness, in order of preference.
    readiness_types: Arc<[String]>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

#[derive(Debug)]
struct KindStore {
    /// Unset when the API server does not serve the kind.
    scope: Option<Scope>,
    objects: HashMap<ObjectKey, Option<bool>>,

    /// Objects observed during an in-progress relist.
    relist: Option<HashMap<ObjectKey, Option<bool>>>,

    /// Set once the initial list has completed.
    synced: bool,
    failing_since: Option<Instant>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

// === impl Cache ===

impl Cache {
    pub fn shared(max_staleness: Duration, readiness_types: Vec<String>) -> SharedCache {
        Arc::new(RwLock::new(Self {
            kinds: HashMap::default(),
            max_staleness,
            readiness_types: readiness_types.into(),
        }))
    }

    /// Registers a kind served by the API server. Its store stays unsynced
    /// until the watch completes its initial list.
    pub fn register(&mut self, kind: GroupKind, scope: Scope) {
        let store = self
            .kinds
            .entry(kind)
            .or_insert_with(|| KindStore::new(Some(scope)));
        if store.scope != Some(scope) {
            *store = KindStore::new(Some(scope));
        }
    }

    /// Records that the API server does not serve a kind, so that no object of
    /// that kind can exist.
    pub fn register_unserved(&mut self, kind: GroupKind) {
        let store = self
            .kinds
            .entry(kind)
            .or_insert_with(|| KindStore::new(None));
        store.scope = None;
        store.synced = true;
    }

    /// Applies a watch event for a registered kind.
    pub fn apply_event(&mut self, kind: &GroupKind, event: watcher::Event<DynamicObject>) {
        let readiness_types = &self.readiness_types;
        let Some(store) = self.kinds.get_mut(kind) else {
            tracing::warn!(%kind, "Ignoring event for unregistered kind");
            return;
        };
        store.failing_since = None;

        match event {
            watcher::Event::Apply(obj) => {
                let (key, ready) = store.entry(&obj, readiness_types);
                store.objects.insert(key, ready);
            }
            watcher::Event::Delete(obj) => {
                let (key, _) = store.entry(&obj, readiness_types);
                store.objects.remove(&key);
            }
            watcher::Event::Init => {
                store.relist = Some(HashMap::default());
            }
            watcher::Event::InitApply(obj) => {
                let (key, ready) = store.entry(&obj, readiness_types);
                store.relist.get_or_insert_with(HashMap::default).insert(key, ready);
            }
            watcher::Event::InitDone => {
                store.objects = store.relist.take().unwrap_or_default();
                if !store.synced {
                    tracing::info!(%kind, objects = store.objects.len(), "Synced");
                }
                store.synced = true;
            }
        }
    }

    /// Records a watch failure. The store keeps serving its last known state
    /// until the failure outlasts the staleness bound.
    pub fn watch_failed(&mut self, kind: &GroupKind, now: Instant) {
        if let Some(store) = self.kinds.get_mut(kind) {
            store.failing_since.get_or_insert(now);
        }
    }

    /// Resolves a dependency as of `now`.
    pub fn resolve_at(&self, dep: &DependencyRef, namespace: &str, now: Instant) -> Resolution {
        let Some(store) = self.kinds.get(&dep.group_kind) else {
            return Resolution::Unavailable;
        };
        if store.is_stale(now, self.max_staleness) {
            return Resolution::Unavailable;
        }

        let key = match store.scope {
            Some(Scope::Namespaced) => ObjectKey {
                namespace: Some(namespace.to_string()),
                name: dep.name.clone(),
            },
            Some(Scope::Cluster) => ObjectKey {
                namespace: None,
                name: dep.name.clone(),
            },
            None => return Resolution::NotFound,
        };

        match store.objects.get(&key) {
            Some(ready) => Resolution::Found { ready: *ready },
            None => Resolution::NotFound,
        }
    }

    /// Returns true if lookups for `kind` currently resolve as unavailable.
    pub fn is_stale(&self, kind: &GroupKind, now: Instant) -> bool {
        self.kinds
            .get(kind)
            .map(|store| store.is_stale(now, self.max_staleness))
            .unwrap_or(true)
    }

    pub(crate) fn kinds(&self) -> impl Iterator<Item = (&GroupKind, usize)> {
        self.kinds.iter().map(|(gk, store)| (gk, store.objects.len()))
    }
}

impl ResolveDependency for Cache {
    fn resolve(&self, dependency: &DependencyRef, namespace: &str) -> Resolution {
        self.resolve_at(dependency, namespace, Instant::now())
    }
}

// === impl KindStore ===

impl KindStore {
    fn new(scope: Option<Scope>) -> Self {
        Self {
            scope,
            objects: HashMap::default(),
            relist: None,
            synced: false,
            failing_since: None,
        }
    }

    fn is_stale(&self, now: Instant, max_staleness: Duration) -> bool {
        if !self.synced {
            return true;
        }
        match self.failing_since {
            Some(since) => now.saturating_duration_since(since) > max_staleness,
            None => false,
        }
    }

    fn entry(&self, obj: &DynamicObject, readiness_types: &[String]) -> (ObjectKey, Option<bool>) {
        let namespace = match self.scope {
            Some(Scope::Cluster) => None,
            _ => obj.namespace(),
        };
        let key = ObjectKey {
            namespace,
            name: obj.name_any(),
        };
        (key, ready_hint(obj, readiness_types))
    }
}

/// Reads an object's readiness from the first recognized condition in its
/// `status.conditions`.
pub fn ready_hint(obj: &DynamicObject, readiness_types: &[String]) -> Option<bool> {
    let conditions = obj
        .data
        .get("status")?
        .get("conditions")?
        .as_array()?;

    readiness_types.iter().find_map(|ty| {
        conditions
            .iter()
            .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(ty.as_str()))
            .map(|c| c.get("status").and_then(|s| s.as_str()) == Some("True"))
    })
}

#[cfg(test)]
mod tests;
