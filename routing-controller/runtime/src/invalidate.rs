//! Maps changes to watched resources onto the service keys that must be
//! re-synced.

use crate::{
    k8s::{
        labels::{Labels, Selector},
        networking::DestinationRule,
        servicemesh::Strategy,
        ResourceExt, Service,
    },
    store::Store,
};
use ahash::AHashSet as HashSet;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Change<T> {
    Created(Arc<T>),
    Updated(Arc<T>),
    Deleted(Arc<T>),
}

// === impl Change ===

impl<T> Change<T> {
    pub fn resource(&self) -> &Arc<T> {
        match self {
            Self::Created(r) | Self::Updated(r) | Self::Deleted(r) => r,
        }
    }
}

/// Every service change re-syncs that service.
pub fn service_keys(change: &Change<Service>) -> Vec<String> {
    key(change.resource().as_ref()).into_iter().collect()
}

/// A `DestinationRule` re-syncs the service of the same name, if it exists.
///
/// Deletions are ignored: a rule is only removed along with its service.
pub fn destination_rule_keys<S>(store: &S, change: &Change<DestinationRule>) -> Vec<String>
where
    S: Store + ?Sized,
{
    let dr = match change {
        Change::Created(dr) | Change::Updated(dr) => dr,
        Change::Deleted(_) => return vec![],
    };
    let (Some(namespace), name) = (dr.namespace(), dr.name_any()) else {
        return vec![];
    };

    match store.service(&namespace, &name) {
        Ok(Some(service)) => key(service.as_ref()).into_iter().collect(),
        Ok(None) => {
            tracing::debug!(%namespace, %name, "Service not created yet");
            vec![]
        }
        Err(error) => {
            tracing::error!(%namespace, %name, %error, "Failed to get service");
            vec![]
        }
    }
}

/// A `Strategy` re-syncs every service in its namespace that carries the
/// strategy's application labels.
///
/// A strategy without the full set of application labels can never target a
/// service, so it is logged and dropped.
pub fn strategy_keys<S>(store: &S, change: &Change<Strategy>) -> Vec<String>
where
    S: Store + ?Sized,
{
    let strategy = change.resource();
    let namespace = strategy.namespace().unwrap_or_default();
    let name = strategy.name_any();

    let Some(app_labels) = Labels::from(strategy.labels().clone()).application_labels() else {
        tracing::error!(%namespace, %name, labels = ?strategy.labels(), "Strategy is missing application labels");
        return vec![];
    };

    let services = match store.services(&namespace, &Selector::from_map(app_labels)) {
        Ok(services) => services,
        Err(error) => {
            tracing::error!(%namespace, %name, %error, "Failed to list services");
            return vec![];
        }
    };

    let mut seen = HashSet::new();
    services
        .iter()
        .filter(|svc| {
            // Services without a selector match nothing.
            svc.spec.as_ref().is_some_and(|spec| {
                spec.selector.is_some() && spec.ports.as_ref().is_some_and(|p| !p.is_empty())
            })
        })
        .filter_map(|svc| key(svc.as_ref()))
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

fn key<K: ResourceExt>(resource: &K) -> Option<String> {
    let namespace = resource.namespace()?;
    Some(format!("{namespace}/{}", resource.name_any()))
}
