//! Indexes `DependencyRule` resources by the kind of subject they govern.
//!
//! The index is updated by a single task processing `DependencyRule` watch
//! events and read concurrently by admission requests. Each kind's rules are
//! published as an immutable, ordered snapshot that is replaced wholesale on
//! every write, so readers only hold the lock long enough to clone an `Arc`.

use crate::validate::{self, InvalidRule};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use dependency_controller_core::{GroupKind, LookupRules, Rule, RuleId, RuleSet};
use dependency_controller_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;

pub type SharedIndex = Arc<RwLock<Index>>;

#[derive(Debug)]
pub struct Index {
    rules: HashMap<RuleId, Indexed>,

    /// Active rules by subject kind, keyed by insertion sequence.
    by_kind: HashMap<GroupKind, BTreeMap<u64, Arc<Rule>>>,

    /// Snapshots of `by_kind`, published to readers.
    snapshots: HashMap<GroupKind, RuleSet>,

    /// Rules that failed validation. These are never enforced.
    invalid: HashMap<RuleId, InvalidRule>,

    /// Publishes each dependency kind the first time a rule references it so
    /// that the kind's objects may be watched.
    dependency_kinds: UnboundedSender<GroupKind>,
    known_dependency_kinds: HashSet<GroupKind>,

    next_seq: u64,
}

#[derive(Debug)]
struct Indexed {
    rule: Arc<Rule>,
    seq: u64,
}

// === impl Index ===

impl Index {
    pub fn shared(dependency_kinds: UnboundedSender<GroupKind>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            rules: HashMap::default(),
            by_kind: HashMap::default(),
            snapshots: HashMap::default(),
            invalid: HashMap::default(),
            dependency_kinds,
            known_dependency_kinds: HashSet::default(),
            next_seq: 0,
        }))
    }

    /// Returns the active rules governing `kind` in insertion order.
    pub fn lookup_by_subject_kind(&self, kind: &GroupKind) -> RuleSet {
        self.snapshots
            .get(kind)
            .cloned()
            .unwrap_or_else(|| Vec::new().into())
    }

    pub fn get(&self, id: &RuleId) -> Option<Arc<Rule>> {
        self.rules.get(id).map(|i| i.rule.clone())
    }

    pub fn invalid(&self, id: &RuleId) -> Option<&InvalidRule> {
        self.invalid.get(id)
    }

    /// Returns the number of active rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn invalid_len(&self) -> usize {
        self.invalid.len()
    }

    pub(crate) fn kinds(&self) -> impl Iterator<Item = (&GroupKind, usize)> {
        self.snapshots.iter().map(|(gk, rules)| (gk, rules.len()))
    }

    /// Adds or updates a valid rule.
    ///
    /// An updated rule keeps its original position in its kind's ordering
    /// unless its subject kind changes.
    pub fn upsert(&mut self, rule: Rule) {
        self.invalid.remove(&rule.id);

        for dep in &rule.depends_on {
            if self.known_dependency_kinds.insert(dep.group_kind.clone()) {
                tracing::debug!(kind = %dep.group_kind, "New dependency kind");
                if self.dependency_kinds.send(dep.group_kind.clone()).is_err() {
                    tracing::warn!(kind = %dep.group_kind, "Dependency kind watches have stopped");
                }
            }
        }

        let id = rule.id.clone();
        let kind = rule.subject.group_kind.clone();
        let (seq, prior_kind) = match self.rules.get(&id) {
            Some(Indexed { rule: prior, .. }) if **prior == rule => {
                tracing::debug!(rule = %id, "No changes");
                return;
            }
            Some(Indexed { rule: prior, seq }) => (*seq, Some(prior.subject.group_kind.clone())),
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                (seq, None)
            }
        };

        tracing::debug!(rule = %id, %kind, "Indexing rule");
        let rule = Arc::new(rule);
        self.rules.insert(
            id,
            Indexed {
                rule: rule.clone(),
                seq,
            },
        );
        if let Some(prior) = prior_kind.filter(|k| *k != kind) {
            self.unindex(prior, seq);
        }
        self.by_kind
            .entry(kind.clone())
            .or_default()
            .insert(seq, rule);
        self.publish(kind);
    }

    /// Removes a rule from the active index and records why it can't be
    /// enforced.
    pub fn reject(&mut self, id: RuleId, error: InvalidRule) {
        tracing::info!(rule = %id, %error, "Ignoring invalid DependencyRule");
        self.remove(&id);
        self.invalid.insert(id, error);
    }

    pub fn delete(&mut self, id: &RuleId) {
        tracing::debug!(rule = %id, "Deleting rule");
        self.invalid.remove(id);
        self.remove(id);
    }

    fn remove(&mut self, id: &RuleId) {
        if let Some(Indexed { rule, seq }) = self.rules.remove(id) {
            self.unindex(rule.subject.group_kind.clone(), seq);
        }
    }

    fn unindex(&mut self, kind: GroupKind, seq: u64) {
        if let Some(rules) = self.by_kind.get_mut(&kind) {
            rules.remove(&seq);
            if rules.is_empty() {
                self.by_kind.remove(&kind);
            }
        }
        self.publish(kind);
    }

    /// Publishes a fresh snapshot of the rules governing `kind`.
    fn publish(&mut self, kind: GroupKind) {
        match self.by_kind.get(&kind) {
            Some(rules) => {
                let snapshot = rules.values().cloned().collect::<RuleSet>();
                self.snapshots.insert(kind, snapshot);
            }
            None => {
                self.snapshots.remove(&kind);
            }
        }
    }
}

impl LookupRules for Index {
    fn lookup_by_subject_kind(&self, kind: &GroupKind) -> RuleSet {
        Index::lookup_by_subject_kind(self, kind)
    }
}

impl kubert::index::IndexNamespacedResource<k8s::DependencyRule> for Index {
    fn apply(&mut self, resource: k8s::DependencyRule) {
        let name = resource.name_unchecked();
        let Some(namespace) = resource.namespace() else {
            tracing::warn!(%name, "DependencyRule must be namespaced");
            return;
        };

        match validate::rule(&namespace, &name, &resource.spec) {
            Ok(rule) => self.upsert(rule),
            Err(error) => self.reject(RuleId::new(namespace, name), error),
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        Index::delete(self, &RuleId::new(namespace, name));
    }

    // Since apply only reindexes a single rule at a time, there's no need to
    // handle resets specially.
}
