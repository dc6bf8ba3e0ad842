use crate::{
    admission::{Admission, AdmissionMetrics},
    core::ReadinessPolicy,
    index,
    index_list::IndexList,
    k8s, lease, status, watches, Engine, ObjectResolver, RuleLookup,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

// The maximum number of status patches to buffer before the reporter starts
// dropping them.
const STATUS_UPDATE_QUEUE_SIZE: usize = 10_000;

// The maximum number of admission decisions awaiting a status report.
const DECISION_QUEUE_SIZE: usize = 10_000;

#[derive(Debug, Parser)]
#[clap(
    name = "dependency-controller",
    about = "Enforces declared dependencies between Kubernetes resources at admission"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "dependency=info,warn",
        env = "DEPENDENCY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    #[clap(long, default_value = "dependency-controller")]
    controller_deployment_name: String,

    #[clap(long, default_value = "dependency-controller")]
    controller_namespace: String,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// How long a dependency kind's watch may fail before lookups against it
    /// are treated as unavailable.
    #[clap(long, default_value = "30")]
    max_cache_staleness_secs: u64,

    /// Whether dependencies that report not-ready satisfy rules (`require` or
    /// `ignore`).
    #[clap(long, default_value = "require")]
    readiness_policy: ReadinessPolicy,

    /// Status condition types that report an object's readiness, in order of
    /// precedence.
    #[clap(long, default_value = "Available,Ready", value_delimiter = ',')]
    readiness_condition_types: Vec<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            controller_deployment_name,
            controller_namespace,
            patch_timeout_ms,
            max_cache_staleness_secs,
            readiness_policy,
            readiness_condition_types,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        // Build the indexes that back admission decisions. The rule index
        // publishes newly referenced dependency kinds so they can be watched.
        let (kinds_tx, kinds_rx) = mpsc::unbounded_channel();
        let rules = index::Index::shared(kinds_tx);
        let objects = index::Cache::shared(
            Duration::from_secs(max_cache_staleness_secs),
            readiness_condition_types,
        );

        let mut prom = <Registry>::default();
        index::metrics::register(&mut prom, rules.clone(), objects.clone());
        let status_metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("status"));
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("failed to fetch `HOSTNAME` environment variable")?;

        let claims = lease::init(
            &runtime,
            &controller_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        // Build the status index which turns admission decisions into
        // DependencyRule status updates.
        let (updates_tx, updates_rx) = mpsc::channel(STATUS_UPDATE_QUEUE_SIZE);
        let (decisions_tx, decisions_rx) = mpsc::channel(DECISION_QUEUE_SIZE);
        let status_index = status::Index::shared(updates_tx);

        let dependency_rules =
            runtime.watch_all::<k8s::DependencyRule>(watcher::Config::default());
        let dependency_rules_indexes = IndexList::new(rules.clone())
            .push(status_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::namespaced(dependency_rules_indexes, dependency_rules)
                .instrument(info_span!("dependencyrules")),
        );

        tokio::spawn(
            watches::run(runtime.client(), objects.clone(), kinds_rx)
                .instrument(info_span!("dependencies")),
        );

        tokio::spawn(
            status::Index::run(status_index.clone(), decisions_rx)
                .instrument(info_span!("status_index")),
        );

        let status_controller = status::Controller::new(
            claims,
            runtime.client(),
            hostname,
            status_index,
            updates_rx,
            Duration::from_millis(patch_timeout_ms),
            status_metrics,
        );
        tokio::spawn(
            status_controller
                .run()
                .instrument(info_span!("status_controller")),
        );

        let engine = Engine::new(RuleLookup(rules), ObjectResolver(objects), readiness_policy);
        let admission = Admission::new(engine, decisions_tx, admission_metrics);
        let runtime = runtime.spawn_server(move || admission);

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
