//! The source registry holds one informer record per watched source collection along with the
//! items most recently observed by that informer's watch.
//!
//! Each record carries a single state channel. The watch loop publishes its phase on it and the
//! registry uses the `blocked` flag to ask the loop to stop:
//!
//! ```text
//! Registered -> Starting -> Started -> Stopped
//!                   \__________________/
//!                     (failed start)
//! ```
//!
//! A blocked record can't be started again. It is removed once its loop has reported `Stopped`.

use ahash::AHashMap as HashMap;
use kpolicy_core::{CachedItem, SourceDescriptor};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::{sync::watch, time};

/// A snapshot of an informer's items.
pub type Items = Arc<Vec<Arc<CachedItem>>>;

#[derive(Debug)]
pub struct ResourceRegistry {
    informers: Mutex<HashMap<SourceDescriptor, Arc<Informer>>>,
    stop: StopConfig,
}

/// Bounds the time spent waiting for a watch loop to stop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StopConfig {
    pub polls: u32,
    pub interval: Duration,
}

#[derive(Debug)]
pub struct Informer {
    descriptor: SourceDescriptor,
    state: watch::Sender<InformerState>,
    requesters: Mutex<BTreeSet<String>>,
    items: Mutex<ItemCache>,
}

/// The current snapshot of an informer's items, indexed by namespace and name.
///
/// Writes replace the snapshot's vector in place unless a reader still holds it, in which case it
/// is copied first.
#[derive(Debug, Default)]
struct ItemCache {
    snapshot: Items,
    slots: HashMap<ItemKey, usize>,
}

type ItemKey = (Option<String>, String);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InformerState {
    pub phase: Phase,
    /// Set when the informer is being torn down. Its watch loop must exit.
    pub blocked: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Registered,
    Starting,
    Started,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("watch for {descriptor} did not stop within {waited:?}")]
    StopTimeout {
        descriptor: SourceDescriptor,
        waited: Duration,
    },
}

// === impl ResourceRegistry ===

impl ResourceRegistry {
    pub fn new(stop: StopConfig) -> Self {
        Self {
            informers: Mutex::new(HashMap::new()),
            stop,
        }
    }

    /// Returns the informer for `descriptor`, creating it if necessary.
    pub fn register_informer(&self, descriptor: &SourceDescriptor) -> Arc<Informer> {
        self.informers
            .lock()
            .entry(descriptor.clone())
            .or_insert_with(|| {
                tracing::debug!(%descriptor, "Registering informer");
                Arc::new(Informer::new(descriptor.clone()))
            })
            .clone()
    }

    pub fn informer(&self, descriptor: &SourceDescriptor) -> Option<Arc<Informer>> {
        self.informers.lock().get(descriptor).cloned()
    }

    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        let mut descriptors = self.informers.lock().keys().cloned().collect::<Vec<_>>();
        descriptors.sort();
        descriptors
    }

    pub fn len(&self) -> usize {
        self.informers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.informers.lock().is_empty()
    }

    /// Stops the informer's watch and removes it along with its items.
    ///
    /// If the watch doesn't stop in time, the informer is left blocked so that a later call may
    /// complete the teardown.
    pub async fn destroy_informer(&self, descriptor: &SourceDescriptor) -> Result<(), Error> {
        let Some(informer) = self.informer(descriptor) else {
            return Ok(());
        };

        informer.block();
        if !informer.wait_stopped(self.stop).await {
            return Err(Error::StopTimeout {
                descriptor: descriptor.clone(),
                waited: self.stop.total(),
            });
        }

        {
            let mut informers = self.informers.lock();
            if informers
                .get(descriptor)
                .is_some_and(|i| Arc::ptr_eq(i, &informer))
            {
                informers.remove(descriptor);
            }
        }
        *informer.items.lock() = ItemCache::default();
        tracing::debug!(%descriptor, "Removed informer");
        Ok(())
    }

    /// Returns the items cached for `descriptor`. Unknown descriptors have no items.
    pub fn get_resources(&self, descriptor: &SourceDescriptor) -> Items {
        self.informer(descriptor)
            .map(|i| i.items.lock().snapshot.clone())
            .unwrap_or_default()
    }

    /// Caches a copy of `object`, replacing any item with the same namespace and name.
    pub fn add_resource(&self, descriptor: &SourceDescriptor, object: &Value) {
        let Some(informer) = self.writable(descriptor) else {
            return;
        };
        let Some(item) = CachedItem::from_value(object.clone()) else {
            tracing::debug!(%descriptor, "Ignoring object without a name");
            return;
        };

        informer.items.lock().insert(Arc::new(item));
    }

    pub fn remove_resource(&self, descriptor: &SourceDescriptor, object: &Value) {
        let Some(informer) = self.writable(descriptor) else {
            return;
        };
        let Some(key) = object_key(object) else {
            return;
        };

        informer.items.lock().remove(key);
    }

    /// Replaces every cached item for `descriptor`.
    pub fn reset_resources(&self, descriptor: &SourceDescriptor, objects: Vec<Value>) {
        let Some(informer) = self.writable(descriptor) else {
            return;
        };

        let mut cache = ItemCache {
            snapshot: Arc::new(Vec::with_capacity(objects.len())),
            slots: HashMap::with_capacity(objects.len()),
        };
        for item in objects.into_iter().filter_map(CachedItem::from_value) {
            cache.insert(Arc::new(item));
        }
        *informer.items.lock() = cache;
    }

    /// Writes to unknown or blocked informers are dropped.
    fn writable(&self, descriptor: &SourceDescriptor) -> Option<Arc<Informer>> {
        let informer = self.informer(descriptor);
        if informer.is_none() {
            tracing::trace!(%descriptor, "Dropping write for unknown informer");
        }
        informer.filter(|i| !i.is_blocked())
    }
}

fn object_key(object: &Value) -> Option<(Option<&str>, &str)> {
    let metadata = object.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty());
    Some((namespace, name))
}

// === impl ItemCache ===

impl ItemCache {
    fn insert(&mut self, item: Arc<CachedItem>) {
        let key = item_key(item.key());
        let items = Arc::make_mut(&mut self.snapshot);
        match self.slots.get(&key) {
            Some(&idx) => items[idx] = item,
            None => {
                self.slots.insert(key, items.len());
                items.push(item);
            }
        }
    }

    /// The last item takes the removed item's place.
    fn remove(&mut self, key: (Option<&str>, &str)) {
        let Some(idx) = self.slots.remove(&item_key(key)) else {
            return;
        };
        let items = Arc::make_mut(&mut self.snapshot);
        items.swap_remove(idx);
        if let Some(moved) = items.get(idx) {
            self.slots.insert(item_key(moved.key()), idx);
        }
    }
}

fn item_key((namespace, name): (Option<&str>, &str)) -> ItemKey {
    (namespace.map(str::to_string), name.to_string())
}

// === impl StopConfig ===

impl StopConfig {
    pub fn total(&self) -> Duration {
        self.interval * self.polls
    }
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            polls: 10,
            interval: Duration::from_secs(1),
        }
    }
}

// === impl Informer ===

impl Informer {
    fn new(descriptor: SourceDescriptor) -> Self {
        let (state, _) = watch::channel(InformerState {
            phase: Phase::Registered,
            blocked: false,
        });
        Self {
            descriptor,
            state,
            requesters: Mutex::default(),
            items: Mutex::default(),
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> InformerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<InformerState> {
        self.state.subscribe()
    }

    pub fn is_blocked(&self) -> bool {
        self.state.borrow().blocked
    }

    pub fn requesters(&self) -> BTreeSet<String> {
        self.requesters.lock().clone()
    }

    pub fn set_requesters(&self, requesters: BTreeSet<String>) {
        *self.requesters.lock() = requesters;
    }

    /// Moves the informer into `Starting`. Returns false if it is blocked or already running.
    pub fn try_start(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.blocked || matches!(s.phase, Phase::Starting | Phase::Started) {
                return false;
            }
            s.phase = Phase::Starting;
            true
        })
    }

    pub fn mark_started(&self) {
        self.state.send_if_modified(|s| {
            if s.phase != Phase::Starting {
                return false;
            }
            s.phase = Phase::Started;
            true
        });
    }

    pub fn mark_stopped(&self) {
        self.state.send_modify(|s| s.phase = Phase::Stopped);
    }

    /// Signals the watch loop to exit and prevents the informer from being restarted.
    ///
    /// An informer that was never started has no loop to wait for, so it stops immediately.
    pub fn block(&self) {
        self.state.send_modify(|s| {
            s.blocked = true;
            if s.phase == Phase::Registered {
                s.phase = Phase::Stopped;
            }
        });
    }

    /// Completes once the informer is blocked.
    pub async fn blocked(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| s.blocked).await;
    }

    async fn wait_stopped(&self, stop: StopConfig) -> bool {
        if self.state().phase == Phase::Stopped {
            return true;
        }

        let mut rx = self.state.subscribe();
        for poll in 1..=stop.polls {
            let stopped = time::timeout(stop.interval, async {
                rx.wait_for(|s| s.phase == Phase::Stopped).await.is_ok()
            })
            .await;
            if matches!(stopped, Ok(true)) {
                return true;
            }
            tracing::debug!(descriptor = %self.descriptor, poll, "Waiting for watch to stop");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpolicy_core::GroupVersionResource;
    use serde_json::json;

    fn configmaps() -> SourceDescriptor {
        SourceDescriptor {
            gvr: GroupVersionResource::new("", "v1", "configmaps"),
            namespace: Some("default".to_string()),
            name: None,
        }
    }

    fn configmap(name: &str, value: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "namespace": "default", "name": name },
            "data": { "value": value },
        })
    }

    fn names(items: &Items) -> Vec<&str> {
        items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn writes_to_unknown_descriptors_are_dropped() {
        let registry = ResourceRegistry::new(StopConfig::default());
        registry.add_resource(&configmaps(), &configmap("a", "1"));
        assert!(registry.get_resources(&configmaps()).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ResourceRegistry::new(StopConfig::default());
        let a = registry.register_informer(&configmaps());
        let b = registry.register_informer(&configmaps());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(a.state().phase, Phase::Registered);
    }

    #[test]
    fn add_replaces_by_identity() {
        let registry = ResourceRegistry::new(StopConfig::default());
        registry.register_informer(&configmaps());
        registry.add_resource(&configmaps(), &configmap("a", "1"));
        registry.add_resource(&configmaps(), &configmap("b", "1"));
        let snapshot = registry.get_resources(&configmaps());

        registry.add_resource(&configmaps(), &configmap("a", "2"));
        let items = registry.get_resources(&configmaps());
        assert_eq!(names(&items), ["a", "b"]);
        assert_eq!(items[0].object["data"]["value"], "2");

        // Earlier snapshots are not modified by later writes.
        assert_eq!(snapshot[0].object["data"]["value"], "1");
    }

    #[test]
    fn remove_matches_namespace_and_name() {
        let registry = ResourceRegistry::new(StopConfig::default());
        registry.register_informer(&configmaps());
        registry.add_resource(&configmaps(), &configmap("a", "1"));
        registry.add_resource(&configmaps(), &configmap("b", "1"));

        // The object's content need not match the cached copy.
        registry.remove_resource(&configmaps(), &configmap("a", "changed"));
        assert_eq!(names(&registry.get_resources(&configmaps())), ["b"]);

        let other_ns = json!({ "metadata": { "namespace": "other", "name": "b" } });
        registry.remove_resource(&configmaps(), &other_ns);
        assert_eq!(names(&registry.get_resources(&configmaps())), ["b"]);
    }

    #[test]
    fn removal_keeps_the_index_consistent() {
        let registry = ResourceRegistry::new(StopConfig::default());
        registry.register_informer(&configmaps());
        for name in ["a", "b", "c"] {
            registry.add_resource(&configmaps(), &configmap(name, "1"));
        }

        registry.remove_resource(&configmaps(), &configmap("a", "1"));
        assert_eq!(names(&registry.get_resources(&configmaps())), ["c", "b"]);

        // The item moved into the removed slot is still found by its key.
        registry.add_resource(&configmaps(), &configmap("c", "2"));
        registry.remove_resource(&configmaps(), &configmap("b", "1"));
        let items = registry.get_resources(&configmaps());
        assert_eq!(names(&items), ["c"]);
        assert_eq!(items[0].object["data"]["value"], "2");
    }

    #[test]
    fn reset_deduplicates_large_lists() {
        let registry = ResourceRegistry::new(StopConfig::default());
        registry.register_informer(&configmaps());

        let objects = (0..20_000)
            .map(|i| configmap(&format!("cm-{}", i % 10_000), &i.to_string()))
            .collect();
        registry.reset_resources(&configmaps(), objects);

        let items = registry.get_resources(&configmaps());
        assert_eq!(items.len(), 10_000);
        assert_eq!(items[0].name, "cm-0");
        assert_eq!(items[0].object["data"]["value"], "10000", "later objects win");

        registry.add_resource(&configmaps(), &configmap("cm-1", "x"));
        registry.add_resource(&configmaps(), &configmap("new", "x"));
        let items = registry.get_resources(&configmaps());
        assert_eq!(items.len(), 10_001);
        assert_eq!(items[1].object["data"]["value"], "x");
    }

    #[test]
    fn reset_replaces_everything() {
        let registry = ResourceRegistry::new(StopConfig::default());
        registry.register_informer(&configmaps());
        registry.add_resource(&configmaps(), &configmap("a", "1"));
        registry.reset_resources(
            &configmaps(),
            vec![configmap("b", "1"), configmap("c", "1")],
        );
        assert_eq!(names(&registry.get_resources(&configmaps())), ["b", "c"]);
    }

    #[test]
    fn start_transitions() {
        let registry = ResourceRegistry::new(StopConfig::default());
        let informer = registry.register_informer(&configmaps());
        assert!(informer.try_start());
        assert!(!informer.try_start(), "already starting");
        informer.mark_started();
        assert_eq!(informer.state().phase, Phase::Started);
        informer.mark_stopped();
        assert!(informer.try_start(), "stopped informers may restart");

        informer.block();
        informer.mark_stopped();
        assert!(!informer.try_start(), "blocked informers never restart");
    }

    #[tokio::test]
    async fn destroy_unstarted_informer() {
        let registry = ResourceRegistry::new(StopConfig::default());
        registry.register_informer(&configmaps());
        registry.add_resource(&configmaps(), &configmap("a", "1"));

        registry.destroy_informer(&configmaps()).await.unwrap();
        assert!(registry.is_empty());
        assert!(registry.get_resources(&configmaps()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_times_out_when_loop_never_stops() {
        let registry = ResourceRegistry::new(StopConfig {
            polls: 3,
            interval: Duration::from_millis(100),
        });
        let informer = registry.register_informer(&configmaps());
        assert!(informer.try_start());

        let err = registry.destroy_informer(&configmaps()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::StopTimeout { waited, .. } if waited == Duration::from_millis(300)
        ));
        assert_eq!(registry.len(), 1, "the blocked record remains");
        assert!(informer.is_blocked());

        // Writes are dropped while the informer is blocked.
        registry.add_resource(&configmaps(), &configmap("a", "1"));
        assert!(registry.get_resources(&configmaps()).is_empty());

        // Once the loop stops, a later pass completes the teardown.
        informer.mark_stopped();
        registry.destroy_informer(&configmaps()).await.unwrap();
        assert!(registry.is_empty());
    }
}
