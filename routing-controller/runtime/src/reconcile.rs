//! Reconciles a service's `VirtualService` against the service, its
//! `DestinationRule` and any `Strategy` that targets it.

use crate::{
    events::{self, EventSink},
    k8s::{
        events::EventType,
        labels::{self, Labels, Selector},
        networking::{VirtualService, VirtualServiceSpec},
        Resource, ResourceExt, Service,
    },
    metrics::{ControllerMetrics, Operation, Outcome},
    store::Store,
};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid key {0:?}: expected <namespace>/<name>")]
    InvalidKey(String),

    #[error("destination rule for service {namespace}/{name} not found")]
    SubsetsNotFound { namespace: String, name: String },

    #[error("more than one strategies applied to service {namespace}/{app} is forbidden: {strategies:?}")]
    ConflictingStrategies {
        namespace: String,
        app: String,
        strategies: Vec<String>,
    },

    #[error("service {namespace}/{name} doesn't have a valid port spec")]
    EmptyRoutes { namespace: String, name: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct Reconciler<S, E> {
    store: Arc<S>,
    events: Arc<E>,
    metrics: ControllerMetrics,
}

// === impl SyncError ===

impl SyncError {
    /// Returns true if retrying the key cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidKey(_))
    }
}

// === impl Reconciler ===

impl<S: Store, E: EventSink> Reconciler<S, E> {
    pub fn new(store: Arc<S>, events: Arc<E>, metrics: ControllerMetrics) -> Self {
        Self {
            store,
            events,
            metrics,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Brings the `VirtualService` for the service identified by `key` up to
    /// date.
    pub async fn sync(&self, key: &str) -> Result<(), SyncError> {
        let (namespace, name) = split_key(key)?;

        let Some(service) = self.store.service(namespace, name)? else {
            return self.delete_orphans(namespace, name).await;
        };

        let Some(ports) = routable_ports(&service) else {
            tracing::debug!(%namespace, %name, "Service is not routable");
            return Ok(());
        };

        let service_labels = Labels::from(service.labels().clone());
        let app = service_labels.component_name().unwrap_or(name);

        let Some(destination_rule) = self.store.destination_rule(namespace, name)? else {
            tracing::info!(%namespace, %name, "DestinationRule not found");
            return Err(SyncError::SubsetsNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        };
        let subsets = &destination_rule.spec.subsets;
        if subsets.is_empty() {
            tracing::debug!(%namespace, %name, "DestinationRule has no subsets");
            return Ok(());
        }

        let selector = Selector::from_map(labels::Map::from([(
            labels::APP_LABEL.to_string(),
            app.to_string(),
        )]));
        let strategies = self.store.strategies(namespace, &selector)?;
        if strategies.len() > 1 {
            return Err(SyncError::ConflictingStrategies {
                namespace: namespace.to_string(),
                app: app.to_string(),
                strategies: strategies.iter().map(|s| s.name_any()).collect(),
            });
        }
        let strategy = strategies.first().map(|s| &s.spec);

        let current = self.store.virtual_service(namespace, app)?;
        let (mut vs, create) = match current {
            Some(vs) if vs.resource_version().is_some_and(|rv| !rv.is_empty()) => {
                (VirtualService::clone(&vs), false)
            }
            _ => (shell(namespace, app), true),
        };

        let mut spec = crate::core::desired_spec(name, ports, subsets, strategy);
        crate::core::merge_http_routes(&vs.spec.http, &mut spec.http);

        if !create && vs.spec == spec && vs.labels() == service.labels() {
            tracing::debug!(%namespace, %name, "VirtualService is up to date");
            return Ok(());
        }

        vs.metadata.labels = service.metadata.labels.clone();
        if vs.metadata.annotations.is_none() {
            vs.metadata.annotations = Some(Default::default());
        }
        vs.spec = spec;
        if vs.spec.has_no_routes() {
            return Err(SyncError::EmptyRoutes {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        self.write(namespace, name, vs, create).await
    }

    async fn write(
        &self,
        namespace: &str,
        name: &str,
        vs: VirtualService,
        create: bool,
    ) -> Result<(), SyncError> {
        let (res, operation) = if create {
            (
                self.store.create_virtual_service(&vs).await,
                Operation::Create,
            )
        } else {
            (
                self.store.update_virtual_service(&vs).await,
                Operation::Update,
            )
        };

        let error = match res {
            Ok(_) => {
                self.metrics.write(operation, Outcome::Ok);
                tracing::info!(%namespace, %name, vs = %vs.name_any(), ?operation, "Wrote VirtualService");
                return Ok(());
            }
            Err(error) => error,
        };
        self.metrics.write(operation, Outcome::Error);

        let (reason, verb) = match operation {
            Operation::Create => (events::FAILED_TO_CREATE, "create"),
            _ => (events::FAILED_TO_UPDATE, "update"),
        };
        self.events
            .record(
                &vs.object_ref(&()),
                EventType::Warning,
                reason,
                format!("Failed to {verb} virtualservice for service {namespace}/{name}: {error}"),
            )
            .await;
        Err(error.into())
    }

    /// Removes the `VirtualService` and `Strategy` left behind by a deleted
    /// service.
    async fn delete_orphans(&self, namespace: &str, name: &str) -> Result<(), SyncError> {
        let res = self.store.delete_virtual_service(namespace, name).await;
        if self.record_delete(res, namespace, name, "VirtualService")? {
            tracing::info!(%namespace, %name, "Deleted orphaned VirtualService");
        }

        let res = self.store.delete_strategy(namespace, name).await;
        if self.record_delete(res, namespace, name, "Strategy")? {
            tracing::info!(%namespace, %name, "Deleted orphaned Strategy");
        }

        Ok(())
    }

    fn record_delete(
        &self,
        res: anyhow::Result<bool>,
        namespace: &str,
        name: &str,
        kind: &str,
    ) -> anyhow::Result<bool> {
        match res {
            Ok(true) => self.metrics.write(Operation::Delete, Outcome::Ok),
            Ok(false) => self.metrics.write(Operation::Delete, Outcome::NotFound),
            Err(ref error) => {
                self.metrics.write(Operation::Delete, Outcome::Error);
                tracing::error!(%namespace, %name, %kind, %error, "Failed to delete orphan");
            }
        }
        res
    }
}

/// Splits a `<namespace>/<name>` key.
pub(crate) fn split_key(key: &str) -> Result<(&str, &str), SyncError> {
    match key.split_once('/') {
        Some((namespace, name))
            if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((namespace, name))
        }
        _ => Err(SyncError::InvalidKey(key.to_string())),
    }
}

/// Returns the service's ports if it is a mesh-enabled application component
/// that exposes at least one port.
fn routable_ports(service: &Service) -> Option<&[crate::k8s::ServicePort]> {
    let labels = Labels::from(service.labels().clone());
    if !labels.is_application_component() || !labels::is_servicemesh_enabled(service.annotations())
    {
        return None;
    }
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .filter(|ports| !ports.is_empty())
}

fn shell(namespace: &str, name: &str) -> VirtualService {
    let mut vs = VirtualService::new(name, VirtualServiceSpec::default());
    vs.metadata.namespace = Some(namespace.to_string());
    vs
}
