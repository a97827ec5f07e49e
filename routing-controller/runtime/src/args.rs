use crate::{
    controller::{Controller, DEFAULT_WORKERS},
    events::KubeEventSink,
    invalidate,
    k8s::{
        networking::{DestinationRule, VirtualService},
        servicemesh::Strategy,
        watcher, Service,
    },
    metrics::ControllerMetrics,
    queue::{Backoff, Queue},
    reconcile::Reconciler,
    store::{KubeStore, Writers},
    watch,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "routing",
    about = "Maintains VirtualServices for mesh-enabled services"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "routing=info,warn",
        env = "ROUTING_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The number of services to sync concurrently.
    #[clap(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
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
            workers,
        } = self;

        if workers == 0 {
            bail!("--workers must be at least 1");
        }

        let mut prom = <Registry>::default();
        let metrics =
            ControllerMetrics::register(prom.sub_registry_with_prefix("virtualservice_controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let (store, writers) = KubeStore::new(runtime.client());
        let store = Arc::new(store);
        let queue = Queue::<String>::new(Backoff::default());

        // Spawn resource watches.

        let Writers {
            services: services_writer,
            destination_rules: destination_rules_writer,
            strategies: strategies_writer,
            virtual_services: virtual_services_writer,
        } = writers;

        let services = runtime.watch_all::<Service>(watcher::Config::default());
        tokio::spawn(
            watch::index(
                services,
                services_writer,
                queue.clone(),
                invalidate::service_keys,
            )
            .instrument(info_span!("services")),
        );

        let destination_rules = runtime.watch_all::<DestinationRule>(watcher::Config::default());
        tokio::spawn({
            let store = store.clone();
            watch::index(
                destination_rules,
                destination_rules_writer,
                queue.clone(),
                move |change| invalidate::destination_rule_keys(store.as_ref(), change),
            )
            .instrument(info_span!("destinationrules"))
        });

        let strategies = runtime.watch_all::<Strategy>(watcher::Config::default());
        tokio::spawn({
            let store = store.clone();
            watch::index(
                strategies,
                strategies_writer,
                queue.clone(),
                move |change| invalidate::strategy_keys(store.as_ref(), change),
            )
            .instrument(info_span!("strategies"))
        });

        // VirtualServices are only cached; changing one doesn't trigger a
        // sync.
        let virtual_services = runtime.watch_all::<VirtualService>(watcher::Config::default());
        tokio::spawn(
            watch::index(
                virtual_services,
                virtual_services_writer,
                queue.clone(),
                |_| vec![],
            )
            .instrument(info_span!("virtualservices")),
        );

        let events = Arc::new(KubeEventSink::new(runtime.client()));
        let reconciler = Reconciler::new(store, events, metrics.clone());
        let controller = Controller::new(reconciler, queue, metrics);
        let mut controller = tokio::spawn(
            controller
                .run(workers, runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        let runtime = runtime.run();
        tokio::pin!(runtime);
        tokio::select! {
            res = &mut runtime => {
                if res.is_err() {
                    bail!("Aborted");
                }
                return Ok(());
            }
            res = &mut controller => {
                res.context("controller task failed")??;
            }
        }

        // The controller only completes cleanly once shutdown has begun.
        if runtime.await.is_err() {
            bail!("Aborted");
        }
        Ok(())
    }
}
