//! Read and write access to the four resource kinds the controller joins.
//!
//! Reads are served from local caches; writes go to the API server.

use crate::k8s::{
    labels::Selector,
    networking::{DestinationRule, VirtualService},
    reflector::{self, ObjectRef},
    servicemesh::Strategy,
    Api, Client, DeleteParams, Error, PostParams, Resource, ResourceExt, Service,
};
use anyhow::{Context, Result};
use std::sync::Arc;

#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    fn service(&self, namespace: &str, name: &str) -> Result<Option<Arc<Service>>>;

    /// Lists the services in `namespace` whose labels match `selector`.
    fn services(&self, namespace: &str, selector: &Selector) -> Result<Vec<Arc<Service>>>;

    fn destination_rule(&self, namespace: &str, name: &str)
        -> Result<Option<Arc<DestinationRule>>>;

    /// Lists the strategies in `namespace` whose labels match `selector`.
    fn strategies(&self, namespace: &str, selector: &Selector) -> Result<Vec<Arc<Strategy>>>;

    fn virtual_service(&self, namespace: &str, name: &str)
        -> Result<Option<Arc<VirtualService>>>;

    async fn create_virtual_service(&self, vs: &VirtualService) -> Result<VirtualService>;

    async fn update_virtual_service(&self, vs: &VirtualService) -> Result<VirtualService>;

    /// Returns false if the resource did not exist.
    async fn delete_virtual_service(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Returns false if the resource did not exist.
    async fn delete_strategy(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Completes once every cache has observed its initial listing.
    async fn wait_until_synced(&self) -> Result<()>;
}

/// A [`Store`] backed by reflector caches.
///
/// The caches are populated by the watches in [`crate::watch`], which own
/// the matching [`Writers`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    services: reflector::Store<Service>,
    destination_rules: reflector::Store<DestinationRule>,
    strategies: reflector::Store<Strategy>,
    virtual_services: reflector::Store<VirtualService>,
}

/// The write halves of a [`KubeStore`]'s caches.
pub struct Writers {
    pub services: reflector::store::Writer<Service>,
    pub destination_rules: reflector::store::Writer<DestinationRule>,
    pub strategies: reflector::store::Writer<Strategy>,
    pub virtual_services: reflector::store::Writer<VirtualService>,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client) -> (Self, Writers) {
        let (services, services_writer) = reflector::store();
        let (destination_rules, destination_rules_writer) = reflector::store();
        let (strategies, strategies_writer) = reflector::store();
        let (virtual_services, virtual_services_writer) = reflector::store();
        let store = Self {
            client,
            services,
            destination_rules,
            strategies,
            virtual_services,
        };
        let writers = Writers {
            services: services_writer,
            destination_rules: destination_rules_writer,
            strategies: strategies_writer,
            virtual_services: virtual_services_writer,
        };
        (store, writers)
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn get<K>(store: &reflector::Store<K>, namespace: &str, name: &str) -> Option<Arc<K>>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + std::hash::Hash,
{
    store.get(&ObjectRef::new(name).within(namespace))
}

fn list<K>(store: &reflector::Store<K>, namespace: &str, selector: &Selector) -> Vec<Arc<K>>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + std::hash::Hash,
{
    store
        .state()
        .into_iter()
        .filter(|obj| {
            obj.meta().namespace.as_deref() == Some(namespace) && selector.matches(obj.labels())
        })
        .collect()
}

fn existed(result: Result<(), Error>) -> Result<bool, Error> {
    match result {
        Ok(()) => Ok(true),
        Err(Error::Api(error)) if error.code == 404 => Ok(false),
        Err(error) => Err(error),
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    fn service(&self, namespace: &str, name: &str) -> Result<Option<Arc<Service>>> {
        Ok(get(&self.services, namespace, name))
    }

    fn services(&self, namespace: &str, selector: &Selector) -> Result<Vec<Arc<Service>>> {
        Ok(list(&self.services, namespace, selector))
    }

    fn destination_rule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<DestinationRule>>> {
        Ok(get(&self.destination_rules, namespace, name))
    }

    fn strategies(&self, namespace: &str, selector: &Selector) -> Result<Vec<Arc<Strategy>>> {
        Ok(list(&self.strategies, namespace, selector))
    }

    fn virtual_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<VirtualService>>> {
        Ok(get(&self.virtual_services, namespace, name))
    }

    async fn create_virtual_service(&self, vs: &VirtualService) -> Result<VirtualService> {
        let namespace = vs.namespace().context("VirtualService must be namespaced")?;
        let created = self
            .api::<VirtualService>(&namespace)
            .create(&PostParams::default(), vs)
            .await?;
        Ok(created)
    }

    async fn update_virtual_service(&self, vs: &VirtualService) -> Result<VirtualService> {
        let namespace = vs.namespace().context("VirtualService must be namespaced")?;
        let updated = self
            .api::<VirtualService>(&namespace)
            .replace(&vs.name_any(), &PostParams::default(), vs)
            .await?;
        Ok(updated)
    }

    async fn delete_virtual_service(&self, namespace: &str, name: &str) -> Result<bool> {
        let res = self
            .api::<VirtualService>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ());
        Ok(existed(res)?)
    }

    async fn delete_strategy(&self, namespace: &str, name: &str) -> Result<bool> {
        let res = self
            .api::<Strategy>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ());
        Ok(existed(res)?)
    }

    async fn wait_until_synced(&self) -> Result<()> {
        tokio::try_join!(
            self.services.wait_until_ready(),
            self.destination_rules.wait_until_ready(),
            self.strategies.wait_until_ready(),
            self.virtual_services.wait_until_ready(),
        )
        .context("cache writer dropped before the initial listing completed")?;
        Ok(())
    }
}
