use crate::conditions::{self, Verdict};
use ahash::AHashMap as HashMap;
use dependency_controller_core::{Decision, RuleId};
use dependency_controller_k8s_api::{self as k8s, Condition, Resource, ResourceExt, Time};
use dependency_controller_k8s_index::validate;
use kubert::lease::Claim;
use parking_lot::RwLock;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::{collections::hash_map::Entry, sync::Arc};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::{self, Duration, Instant},
};

pub const FIELD_MANAGER: &str = "dependency-controller";

/// How long to wait before re-sending status that failed to persist.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

pub type SharedIndex = Arc<RwLock<Index>>;

/// Applies status patches while this replica holds the write lease.
pub struct Controller {
    claims: watch::Receiver<Arc<Claim>>,
    client: k8s::Client,
    name: String,
    index: SharedIndex,
    updates: mpsc::Receiver<Update>,
    patch_timeout: Duration,
    metrics: ControllerMetrics,
}

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    patches: Family<PatchLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PatchLabels {
    result: PatchResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum PatchResult {
    Succeeded,
    Failed,
    Timeout,
}

/// Tracks the conditions of every observed `DependencyRule` and turns
/// decisions into status updates.
///
/// Each rule has a desired set of conditions, derived from the verdicts
/// reported for it, and the set last known to be persisted, either observed on
/// the resource or acknowledged by the `Controller`. An update is sent
/// whenever the two differ, so an update that is dropped or fails to apply is
/// sent again by the next report or resync.
#[derive(Debug)]
pub struct Index {
    updates: mpsc::Sender<Update>,
    rules: HashMap<RuleId, RuleStatus>,
}

#[derive(Debug, Default)]
struct RuleStatus {
    generation: Option<i64>,
    desired: Vec<Condition>,
    persisted: Vec<Condition>,
}

#[derive(Debug, PartialEq)]
pub struct Update {
    pub id: RuleId,
    pub conditions: Vec<Condition>,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patches = Family::default();
        prom.register(
            "patches",
            "Count of DependencyRule status patches by result",
            patches.clone(),
        );
        Self { patches }
    }

    fn inc(&self, result: PatchResult) {
        self.patches.get_or_create(&PatchLabels { result }).inc();
    }
}

// === impl Controller ===

impl Controller {
    pub fn new(
        claims: watch::Receiver<Arc<Claim>>,
        client: k8s::Client,
        name: impl ToString,
        index: SharedIndex,
        updates: mpsc::Receiver<Update>,
        patch_timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            claims,
            client,
            name: name.to_string(),
            index,
            updates,
            patch_timeout,
            metrics,
        }
    }

    pub async fn run(mut self) {
        let params = k8s::PatchParams::apply(FIELD_MANAGER);

        // Set when some status could not be persisted or queued.
        let mut retry_at: Option<Instant> = None;
        loop {
            tokio::select! {
                update = self.updates.recv() => {
                    let Some(Update { id, conditions }) = update else {
                        return;
                    };
                    if !self.is_leader() {
                        tracing::trace!(rule = %id, "Not the lease holder; skipping status patch");
                        continue;
                    }
                    if !self.index.read().needs_patch(&id, &conditions) {
                        tracing::trace!(rule = %id, "Status already persisted");
                        continue;
                    }

                    if self.patch(&id, &conditions, &params).await {
                        self.index.write().persisted(&id, conditions);
                    } else {
                        retry_at.get_or_insert_with(|| Instant::now() + RETRY_BACKOFF);
                    }
                }

                Ok(()) = self.claims.changed() => {
                    if self.is_leader() {
                        tracing::info!("Acquired status lease");
                        if !self.index.read().resync() {
                            retry_at.get_or_insert_with(|| Instant::now() + RETRY_BACKOFF);
                        }
                    }
                }

                () = time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    retry_at = None;
                    if self.is_leader() && !self.index.read().resync() {
                        retry_at = Some(Instant::now() + RETRY_BACKOFF);
                    }
                }
            }
        }
    }

    fn is_leader(&self) -> bool {
        self.claims.borrow().is_current_for(&self.name)
    }

    /// Patches a rule's status, returning true if the patch was applied.
    async fn patch(
        &self,
        id: &RuleId,
        conditions: &[Condition],
        params: &k8s::PatchParams,
    ) -> bool {
        let api = k8s::Api::<k8s::DependencyRule>::namespaced(self.client.clone(), &id.namespace);
        let patch = make_patch(conditions);
        match time::timeout(self.patch_timeout, api.patch_status(&id.name, params, &patch)).await {
            Ok(Ok(_)) => {
                tracing::debug!(rule = %id, "Patched status");
                self.metrics.inc(PatchResult::Succeeded);
                true
            }
            Ok(Err(error)) => {
                tracing::error!(rule = %id, %error, "Failed to patch status");
                self.metrics.inc(PatchResult::Failed);
                false
            }
            Err(_) => {
                tracing::error!(
                    rule = %id,
                    timeout = ?self.patch_timeout,
                    "Timed out patching status"
                );
                self.metrics.inc(PatchResult::Timeout);
                false
            }
        }
    }
}

// === impl Index ===

impl Index {
    pub fn shared(updates: mpsc::Sender<Update>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            updates,
            rules: HashMap::default(),
        }))
    }

    /// Receives admission decisions and reports them until the sender is
    /// dropped.
    pub async fn run(index: SharedIndex, mut decisions: mpsc::Receiver<Decision>) {
        while let Some(decision) = decisions.recv().await {
            index.write().report(&decision);
        }
    }

    /// Records the verdict of each rule that governed a decision.
    pub fn report(&mut self, decision: &Decision) {
        for evaluated in &decision.evaluated {
            let verdict = if evaluated.satisfied {
                Verdict::Satisfied
            } else {
                let unmet = decision
                    .reasons_for(&evaluated.rule)
                    .map(|r| format!("{} ({})", r.dependency, r.unmet))
                    .collect::<Vec<_>>();
                Verdict::Unsatisfied {
                    enforcement: evaluated.enforcement,
                    message: format!("Unmet dependencies: {}", unmet.join(", ")),
                }
            };
            self.set_verdict(&evaluated.rule, verdict);
        }
    }

    /// Returns the desired conditions of a rule.
    pub fn conditions(&self, id: &RuleId) -> Option<&[Condition]> {
        self.rules.get(id).map(|s| s.desired.as_slice())
    }

    /// Returns true if `conditions` are not yet known to be persisted for a
    /// tracked rule.
    pub fn needs_patch(&self, id: &RuleId, conditions: &[Condition]) -> bool {
        self.rules
            .get(id)
            .map(|s| s.persisted != conditions)
            .unwrap_or(false)
    }

    /// Records that a rule's status was written.
    pub fn persisted(&mut self, id: &RuleId, conditions: Vec<Condition>) {
        if let Some(status) = self.rules.get_mut(id) {
            status.persisted = conditions;
        }
    }

    /// Sends an update for every rule whose desired conditions are not known to
    /// be persisted. Returns false if any update could not be queued.
    pub fn resync(&self) -> bool {
        let mut queued = true;
        for (id, status) in &self.rules {
            queued &= send(&self.updates, id, status);
        }
        queued
    }

    fn set_verdict(&mut self, id: &RuleId, verdict: Verdict) {
        let Some(status) = self.rules.get_mut(id) else {
            tracing::debug!(rule = %id, "Ignoring verdict for unknown rule");
            return;
        };

        let now = now();
        let mut changed = false;
        for desired in verdict.conditions() {
            changed |= conditions::set(&mut status.desired, desired, status.generation, &now);
        }
        if changed {
            tracing::debug!(rule = %id, ?verdict, "Status changed");
        }
        send(&self.updates, id, status);
    }
}

/// Queues a rule's desired conditions if they differ from its persisted ones.
/// Returns false if the update could not be queued.
fn send(updates: &mpsc::Sender<Update>, id: &RuleId, status: &RuleStatus) -> bool {
    if status.desired == status.persisted {
        return true;
    }

    let update = Update {
        id: id.clone(),
        conditions: status.desired.clone(),
    };
    match updates.try_send(update) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::debug!(rule = %id, "Status update queue is full");
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::error!(rule = %id, "Status controller has stopped");
            false
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::DependencyRule> for Index {
    fn apply(&mut self, resource: k8s::DependencyRule) {
        let name = resource.name_unchecked();
        let Some(namespace) = resource.namespace() else {
            return;
        };
        let id = RuleId::new(&namespace, &name);

        let observed = resource
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        let status = match self.rules.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let status = entry.into_mut();
                status.persisted = observed;
                status
            }
            // Start from the observed conditions so that transition times
            // survive restarts and leadership changes.
            Entry::Vacant(entry) => entry.insert(RuleStatus {
                generation: None,
                desired: observed.clone(),
                persisted: observed,
            }),
        };
        status.generation = resource.metadata.generation;

        let verdict = match validate::rule(&namespace, &name, &resource.spec) {
            Err(error) => Some(Verdict::Invalid(error.to_string())),
            Ok(_) if status.desired.is_empty()
                || conditions::has_reason(
                    &status.desired,
                    conditions::DEGRADED,
                    conditions::INVALID_RULE,
                ) =>
            {
                Some(Verdict::Accepted)
            }
            Ok(_) => None,
        };
        match verdict {
            Some(verdict) => self.set_verdict(&id, verdict),
            None => {
                send(&self.updates, &id, status);
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.rules.remove(&RuleId::new(namespace, name));
    }

    // Since apply only handles a single rule at a time, there's no need to
    // handle resets specially.
}

pub(crate) fn make_patch(conditions: &[Condition]) -> k8s::Patch<serde_json::Value> {
    k8s::Patch::Merge(serde_json::json!({
        "apiVersion": k8s::DependencyRule::api_version(&()),
        "kind": k8s::DependencyRule::kind(&()),
        "status": {
            "conditions": conditions,
        },
    }))
}

fn now() -> Time {
    #[cfg(not(test))]
    let timestamp = chrono::Utc::now();
    #[cfg(test)]
    let timestamp = chrono::DateTime::<chrono::Utc>::MIN_UTC;
    Time(timestamp)
}
