//! Watches the kinds that rules depend on.
//!
//! The rule index publishes each dependency kind the first time a rule
//! references it. Every such kind gets its own task that discovers how the
//! API server serves the kind and then feeds a dynamic watch into the object
//! cache. Watches are never stopped, even if no rule references the kind
//! anymore.

use crate::{
    core::GroupKind,
    index::{Scope, SharedCache},
    k8s::{self, watcher, ApiResource, Client, Discovery, DynamicObject},
};
use anyhow::Result;
use futures::prelude::*;
use kube::runtime::WatchStreamExt;
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};
use tracing::{info_span, Instrument};

/// How long to wait before retrying a failed discovery.
const DISCOVERY_RETRY: Duration = Duration::from_secs(5);

/// How often to check whether an unserved kind has been installed.
const REDISCOVERY_PERIOD: Duration = Duration::from_secs(60);

pub async fn run(client: Client, cache: SharedCache, mut kinds: mpsc::UnboundedReceiver<GroupKind>) {
    while let Some(kind) = kinds.recv().await {
        let span = info_span!("watch", %kind);
        tokio::spawn(watch_kind(client.clone(), cache.clone(), kind).instrument(span));
    }
}

async fn watch_kind(client: Client, cache: SharedCache, kind: GroupKind) {
    let mut unserved = false;
    let (resource, scope) = loop {
        match discover(&client, &kind).await {
            Ok(Some(found)) => break found,
            Ok(None) => {
                if !unserved {
                    tracing::warn!("Kind is not served; dependencies on it are missing");
                    cache.write().register_unserved(kind.clone());
                    unserved = true;
                }
                time::sleep(REDISCOVERY_PERIOD).await;
            }
            Err(error) => {
                tracing::warn!(%error, "Discovery failed");
                time::sleep(DISCOVERY_RETRY).await;
            }
        }
    };

    tracing::info!(?scope, version = %resource.version, "Watching");
    cache.write().register(kind.clone(), scope);

    let api = k8s::Api::<DynamicObject>::all_with(client, &resource);
    let events = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => cache.write().apply_event(&kind, event),
            Err(error) => {
                tracing::warn!(%error, "Watch failed");
                cache.write().watch_failed(&kind, Instant::now());
            }
        }
    }
}

/// Finds the preferred version of a kind, returning `None` if it is not
/// served.
async fn discover(client: &Client, kind: &GroupKind) -> Result<Option<(ApiResource, Scope)>> {
    let discovery = Discovery::new(client.clone())
        .filter(&[kind.group.as_str()])
        .run()
        .await?;

    let found = discovery
        .groups()
        .find(|g| g.name() == kind.group)
        .and_then(|g| g.recommended_kind(&kind.kind));
    Ok(found.map(|(resource, caps)| {
        let scope = match caps.scope {
            k8s::Scope::Namespaced => Scope::Namespaced,
            k8s::Scope::Cluster => Scope::Cluster,
        };
        (resource, scope)
    }))
}
