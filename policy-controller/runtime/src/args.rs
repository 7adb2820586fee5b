use crate::{
    admission::Admission,
    apply::KubeApplier,
    audit::KubeAudit,
    index::{
        InformerConfig, InformerManager, InformerMetrics, KubeWatches, Policies, PolicyIndex,
        ResourceRegistry, StopConfig,
    },
    k8s, AdmissionMetrics,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{sync::Arc, time::Duration};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "kpolicy", about = "A Kubernetes policy admission controller")]
pub struct Args {
    #[clap(long, default_value = "kpolicy=info,warn", env = "KPOLICY_LOG")]
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

    /// How often source watches are reconciled against policies.
    #[clap(long, default_value = "2000")]
    reconcile_interval_ms: u64,

    #[clap(long, default_value = "30000")]
    cleanup_interval_ms: u64,

    /// How long a started watch may take to observe its first event before a warning is logged.
    #[clap(long, default_value = "10000")]
    watch_ack_timeout_ms: u64,

    #[clap(long, default_value = "1000")]
    watch_stop_poll_ms: u64,

    /// The number of polls to wait for a watch to stop before giving up until the next pass.
    #[clap(long, default_value = "10")]
    watch_stop_polls: u32,

    /// Caps the backoff between attempts to start a failing watch.
    #[clap(long, default_value = "300000")]
    watch_max_backoff_ms: u64,

    /// The component reported on audit events.
    #[clap(long, default_value = "kpolicy-controller")]
    reporting_component: String,

    /// The field manager used to apply generated objects.
    #[clap(long, default_value = "kpolicy")]
    field_manager: String,
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
            reconcile_interval_ms,
            cleanup_interval_ms,
            watch_ack_timeout_ms,
            watch_stop_poll_ms,
            watch_stop_polls,
            watch_max_backoff_ms,
            reporting_component,
            field_manager,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let kpolicy = prom.sub_registry_with_prefix("kpolicy");
        let informer_metrics = InformerMetrics::register(kpolicy);
        let admission_metrics = AdmissionMetrics::register(kpolicy);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // Build the policy index, which feeds the policy registries from the policy resources.
        let policies = Arc::new(Policies::default());
        let policy_index = PolicyIndex::shared(policies.clone());

        let validation_policies =
            runtime.watch_all::<k8s::ValidationPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(policy_index.clone(), validation_policies)
                .instrument(info_span!("validationpolicies")),
        );

        let mutation_policies =
            runtime.watch_all::<k8s::MutationPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(policy_index.clone(), mutation_policies)
                .instrument(info_span!("mutationpolicies")),
        );

        let generation_policies =
            runtime.watch_all::<k8s::GenerationPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(policy_index, generation_policies)
                .instrument(info_span!("generationpolicies")),
        );

        // Keep a watch running for every source collection the active policies read.
        let sources = Arc::new(ResourceRegistry::new(StopConfig {
            polls: watch_stop_polls,
            interval: Duration::from_millis(watch_stop_poll_ms),
        }));
        let informers = Arc::new(InformerManager::new(
            sources.clone(),
            KubeWatches::new(runtime.client()),
            policies.clone(),
            InformerConfig {
                reconcile_interval: Duration::from_millis(reconcile_interval_ms),
                cleanup_interval: Duration::from_millis(cleanup_interval_ms),
                ack_timeout: Duration::from_millis(watch_ack_timeout_ms),
                max_backoff: Duration::from_millis(watch_max_backoff_ms),
            },
            informer_metrics,
            runtime.shutdown_handle(),
        ));
        tokio::spawn(
            informers
                .clone()
                .run()
                .instrument(info_span!("informers")),
        );
        tokio::spawn(informers.run_cleaner().instrument(info_span!("cleaner")));

        let admission = Admission::new(
            policies,
            sources,
            Arc::new(KubeAudit::new(runtime.client(), reporting_component)),
            Arc::new(KubeApplier::new(runtime.client(), &field_manager)),
            admission_metrics,
        );
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
