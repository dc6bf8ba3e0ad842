use super::*;
use dependency_controller_k8s_api::{ApiResource, GroupVersionKind};

fn readiness_types() -> Vec<String> {
    vec!["Available".to_string(), "Ready".to_string()]
}

fn config_map_kind() -> GroupKind {
    GroupKind::new("", "ConfigMap")
}

fn mk_obj(ns: Option<&str>, name: &str, status: serde_json::Value) -> DynamicObject {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"));
    let mut obj = DynamicObject::new(name, &ar).data(serde_json::json!({ "status": status }));
    obj.metadata.namespace = ns.map(Into::into);
    obj
}

fn dep(kind: &GroupKind, name: &str) -> DependencyRef {
    DependencyRef {
        group_kind: kind.clone(),
        name: name.to_string(),
    }
}

fn synced_cache(kind: &GroupKind, scope: Scope) -> Cache {
    let shared = Cache::shared(Duration::from_secs(30), readiness_types());
    let mut cache = Arc::try_unwrap(shared)
        .expect("cache must be uniquely owned")
        .into_inner();
    cache.register(kind.clone(), scope);
    cache.apply_event(kind, watcher::Event::Init);
    cache.apply_event(kind, watcher::Event::InitDone);
    cache
}

#[test]
fn unknown_kinds_are_unavailable() {
    let cache = Cache::shared(Duration::from_secs(30), readiness_types());
    assert_eq!(
        cache
            .read()
            .resolve_at(&dep(&config_map_kind(), "cfg"), "ns", Instant::now()),
        Resolution::Unavailable
    );
}

#[test]
fn unsynced_kinds_are_unavailable() {
    let kind = config_map_kind();
    let cache = Cache::shared(Duration::from_secs(30), readiness_types());
    cache.write().register(kind.clone(), Scope::Namespaced);
    cache.write().apply_event(&kind, watcher::Event::Init);
    cache.write().apply_event(
        &kind,
        watcher::Event::InitApply(mk_obj(Some("ns"), "cfg", serde_json::json!({}))),
    );

    let now = Instant::now();
    assert_eq!(
        cache.read().resolve_at(&dep(&kind, "cfg"), "ns", now),
        Resolution::Unavailable
    );
    assert!(cache.read().is_stale(&kind, now));

    cache.write().apply_event(&kind, watcher::Event::InitDone);
    assert_eq!(
        cache.read().resolve_at(&dep(&kind, "cfg"), "ns", now),
        Resolution::Found { ready: None }
    );
    assert!(!cache.read().is_stale(&kind, now));
}

#[test]
fn namespaced_lookups_are_scoped() {
    let kind = config_map_kind();
    let mut cache = synced_cache(&kind, Scope::Namespaced);
    cache.apply_event(
        &kind,
        watcher::Event::Apply(mk_obj(Some("ns-0"), "cfg", serde_json::json!({}))),
    );

    let now = Instant::now();
    assert!(cache.resolve_at(&dep(&kind, "cfg"), "ns-0", now).found());
    assert_eq!(
        cache.resolve_at(&dep(&kind, "cfg"), "ns-1", now),
        Resolution::NotFound
    );
    assert_eq!(
        cache.resolve_at(&dep(&kind, "other"), "ns-0", now),
        Resolution::NotFound
    );
}

#[test]
fn cluster_scoped_lookups_ignore_namespace() {
    let kind = GroupKind::new("storage.k8s.io", "StorageClass");
    let mut cache = synced_cache(&kind, Scope::Cluster);
    cache.apply_event(
        &kind,
        watcher::Event::Apply(mk_obj(None, "fast", serde_json::json!({}))),
    );

    let now = Instant::now();
    assert!(cache.resolve_at(&dep(&kind, "fast"), "ns-0", now).found());
    assert!(cache.resolve_at(&dep(&kind, "fast"), "ns-1", now).found());
}

#[test]
fn deletes_remove_objects() {
    let kind = config_map_kind();
    let mut cache = synced_cache(&kind, Scope::Namespaced);
    let obj = mk_obj(Some("ns"), "cfg", serde_json::json!({}));
    cache.apply_event(&kind, watcher::Event::Apply(obj.clone()));
    cache.apply_event(&kind, watcher::Event::Delete(obj));

    assert_eq!(
        cache.resolve_at(&dep(&kind, "cfg"), "ns", Instant::now()),
        Resolution::NotFound
    );
}

#[test]
fn relist_replaces_state_atomically() {
    let kind = config_map_kind();
    let mut cache = synced_cache(&kind, Scope::Namespaced);
    cache.apply_event(
        &kind,
        watcher::Event::Apply(mk_obj(Some("ns"), "old", serde_json::json!({}))),
    );

    // While a relist is in progress, the prior state continues to be served.
    cache.apply_event(&kind, watcher::Event::Init);
    cache.apply_event(
        &kind,
        watcher::Event::InitApply(mk_obj(Some("ns"), "new", serde_json::json!({}))),
    );
    let now = Instant::now();
    assert!(cache.resolve_at(&dep(&kind, "old"), "ns", now).found());
    assert!(!cache.resolve_at(&dep(&kind, "new"), "ns", now).found());

    // Objects deleted while the watch was down are dropped on completion.
    cache.apply_event(&kind, watcher::Event::InitDone);
    assert!(!cache.resolve_at(&dep(&kind, "old"), "ns", now).found());
    assert!(cache.resolve_at(&dep(&kind, "new"), "ns", now).found());
}

#[test]
fn failing_watch_becomes_stale_after_bound() {
    let kind = config_map_kind();
    let mut cache = synced_cache(&kind, Scope::Namespaced);
    cache.apply_event(
        &kind,
        watcher::Event::Apply(mk_obj(Some("ns"), "cfg", serde_json::json!({}))),
    );

    let failed_at = Instant::now();
    cache.watch_failed(&kind, failed_at);
    // Repeated failures don't reset the clock.
    cache.watch_failed(&kind, failed_at + Duration::from_secs(20));

    assert!(cache
        .resolve_at(&dep(&kind, "cfg"), "ns", failed_at + Duration::from_secs(30))
        .found());
    assert_eq!(
        cache.resolve_at(&dep(&kind, "cfg"), "ns", failed_at + Duration::from_secs(31)),
        Resolution::Unavailable
    );
    assert!(cache.is_stale(&kind, failed_at + Duration::from_secs(31)));

    // Any successful event clears the failure.
    cache.apply_event(
        &kind,
        watcher::Event::Apply(mk_obj(Some("ns"), "other", serde_json::json!({}))),
    );
    assert!(cache
        .resolve_at(&dep(&kind, "cfg"), "ns", failed_at + Duration::from_secs(60))
        .found());
}

#[test]
fn unserved_kinds_resolve_as_missing() {
    let kind = GroupKind::new("example.com", "Widget");
    let cache = Cache::shared(Duration::from_secs(30), readiness_types());
    cache.write().register_unserved(kind.clone());

    assert_eq!(
        cache
            .read()
            .resolve_at(&dep(&kind, "w"), "ns", Instant::now()),
        Resolution::NotFound
    );
    // The store is authoritative, so it isn't reported as stale either.
    assert!(!cache.read().is_stale(&kind, Instant::now()));
}

#[test]
fn newly_served_kinds_must_sync() {
    let kind = GroupKind::new("example.com", "Widget");
    let cache = Cache::shared(Duration::from_secs(30), readiness_types());
    cache.write().register_unserved(kind.clone());
    cache.write().register(kind.clone(), Scope::Namespaced);

    let now = Instant::now();
    assert_eq!(
        cache.read().resolve_at(&dep(&kind, "w"), "ns", now),
        Resolution::Unavailable
    );

    cache.write().apply_event(&kind, watcher::Event::Init);
    cache.write().apply_event(&kind, watcher::Event::InitDone);
    assert_eq!(
        cache.read().resolve_at(&dep(&kind, "w"), "ns", now),
        Resolution::NotFound
    );
}

#[test]
fn reads_readiness_conditions() {
    let types = readiness_types();
    let status = |conditions: serde_json::Value| {
        mk_obj(
            Some("ns"),
            "obj",
            serde_json::json!({ "conditions": conditions }),
        )
    };

    assert_eq!(
        ready_hint(&mk_obj(Some("ns"), "obj", serde_json::json!({})), &types),
        None
    );
    assert_eq!(
        ready_hint(
            &status(serde_json::json!([{ "type": "Available", "status": "True" }])),
            &types
        ),
        Some(true)
    );
    assert_eq!(
        ready_hint(
            &status(serde_json::json!([{ "type": "Ready", "status": "False" }])),
            &types
        ),
        Some(false)
    );
    assert_eq!(
        ready_hint(
            &status(serde_json::json!([
                { "type": "Ready", "status": "False" },
                { "type": "Available", "status": "True" },
            ])),
            &types
        ),
        Some(true),
        "earlier readiness types take precedence"
    );
    assert_eq!(
        ready_hint(
            &status(serde_json::json!([{ "type": "Progressing", "status": "True" }])),
            &types
        ),
        None
    );
}

#[test]
fn resolution_carries_readiness() {
    let kind = config_map_kind();
    let mut cache = synced_cache(&kind, Scope::Namespaced);
    cache.apply_event(
        &kind,
        watcher::Event::Apply(mk_obj(
            Some("ns"),
            "cfg",
            serde_json::json!({ "conditions": [{ "type": "Ready", "status": "False" }] }),
        )),
    );

    let resolution = cache.resolve_at(&dep(&kind, "cfg"), "ns", Instant::now());
    assert!(resolution.found());
    assert_eq!(resolution.ready_hint(), Some(false));
}
