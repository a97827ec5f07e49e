//! Feeds watch events into the reflector caches and turns them into
//! [`Change`]s for the invalidators.

use crate::{
    invalidate::Change,
    k8s::{
        reflector::{self, store::Writer, ObjectRef},
        watcher, Resource,
    },
    queue::Queue,
};
use ahash::AHashSet as HashSet;
use futures::prelude::*;
use std::{hash::Hash, sync::Arc};

/// Applies watch events to a cache, classifying each against the cache's
/// contents before the event is applied.
pub struct Tracker<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + Hash,
{
    writer: Writer<K>,
    reader: reflector::Store<K>,

    /// Objects observed since the current re-list began.
    relisted: Option<HashSet<ObjectRef<K>>>,
}

/// Drives a cache from a watch, enqueueing the keys that each change
/// invalidates.
pub async fn index<K, F>(
    events: impl Stream<Item = watcher::Event<K>>,
    writer: Writer<K>,
    queue: Queue<String>,
    invalidate: F,
) where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + Hash,
    F: Fn(&Change<K>) -> Vec<String>,
{
    let mut tracker = Tracker::new(writer);
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        for change in tracker.apply(event) {
            for key in invalidate(&change) {
                queue.add(key);
            }
        }
    }
    tracing::debug!("Watch completed");
}

// === impl Tracker ===

impl<K> Tracker<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Clone + Default + Eq + Hash,
{
    pub fn new(writer: Writer<K>) -> Self {
        let reader = writer.as_reader();
        Self {
            writer,
            reader,
            relisted: None,
        }
    }

    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<Change<K>> {
        let changes = match &event {
            watcher::Event::Apply(obj) => vec![self.classify(obj)],
            watcher::Event::Delete(obj) => vec![Change::Deleted(Arc::new(obj.clone()))],
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                vec![]
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(ObjectRef::from_obj(obj));
                }
                vec![self.classify(obj)]
            }
            watcher::Event::InitDone => {
                // The cache still holds the state from before the re-list.
                let relisted = self.relisted.take().unwrap_or_default();
                self.reader
                    .state()
                    .into_iter()
                    .filter(|obj| !relisted.contains(&ObjectRef::from_obj(obj.as_ref())))
                    .map(Change::Deleted)
                    .collect()
            }
        };
        self.writer.apply_watcher_event(&event);
        changes
    }

    fn classify(&self, obj: &K) -> Change<K> {
        let obj = Arc::new(obj.clone());
        if self.reader.get(&ObjectRef::from_obj(obj.as_ref())).is_some() {
            Change::Updated(obj)
        } else {
            Change::Created(obj)
        }
    }
}
