//! Starts, stops and restarts the watches that feed the source registry.
//!
//! The manager periodically compares the set of source collections that policies need against the
//! registry. Missing informers are registered and started; informers that are no longer needed
//! are blocked, awaited and removed. Each started informer runs its own watch task, which mirrors
//! watch events into the registry until the process shuts down or the informer is blocked.
//!
//! A watch that fails before producing its first event is retried on a later tick, after an
//! exponential backoff that starts at the reconcile interval.

use crate::{
    metrics::InformerMetrics,
    registry::{Informer, Phase, ResourceRegistry},
    watches::{EventStream, WatchSource},
};
use ahash::AHashMap as HashMap;
use futures::prelude::*;
use kpolicy_core::SourceDescriptor;
use kube::runtime::watcher;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};
use tokio::time;
use tracing::{info_span, Instrument};

/// Source collections that policies need, with the requesters of each.
pub type Desired = BTreeMap<SourceDescriptor, BTreeSet<String>>;

pub trait DesiredWatches: Send + Sync + 'static {
    fn desired_watches(&self) -> Desired;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub reconcile_interval: Duration,
    pub cleanup_interval: Duration,
    /// How long a started watch may take to observe its first event before a warning is logged.
    pub ack_timeout: Duration,
    pub max_backoff: Duration,
}

pub struct InformerManager<W, D> {
    registry: Arc<ResourceRegistry>,
    watches: W,
    desired: D,
    config: Config,
    metrics: InformerMetrics,
    failures: Failures,
    shutdown: drain::Watch,
}

/// Start failures by source, shared with watch tasks.
#[derive(Clone, Debug)]
struct Failures {
    by_source: Arc<Mutex<HashMap<SourceDescriptor, Backoff>>>,
    base: Duration,
    max: Duration,
}

#[derive(Copy, Clone, Debug)]
struct Backoff {
    failures: u32,
    retry_at: time::Instant,
}

struct WatchTask {
    informer: Arc<Informer>,
    registry: Arc<ResourceRegistry>,
    failures: Failures,
    metrics: InformerMetrics,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            max_backoff: Duration::from_secs(5 * 60),
        }
    }
}

// === impl DesiredWatches ===

impl<D: DesiredWatches> DesiredWatches for Arc<D> {
    fn desired_watches(&self) -> Desired {
        (**self).desired_watches()
    }
}

// === impl InformerManager ===

impl<W: WatchSource, D: DesiredWatches> InformerManager<W, D> {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        watches: W,
        desired: D,
        config: Config,
        metrics: InformerMetrics,
        shutdown: drain::Watch,
    ) -> Self {
        Self {
            registry,
            watches,
            desired,
            metrics,
            failures: Failures {
                by_source: Default::default(),
                base: config.reconcile_interval,
                max: config.max_backoff,
            },
            config,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Sources whose most recent watch failed to start.
    pub fn failing(&self) -> Vec<SourceDescriptor> {
        let mut failing = self
            .failures
            .by_source
            .lock()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        failing.sort();
        failing
    }

    /// Reconciles every `reconcile_interval` until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let shutdown = self.shutdown.clone().signaled();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::debug!("Shutdown");
                    return;
                }
                _ = async {
                    ticker.tick().await;
                    self.reconcile().await;
                } => {}
            }
        }
    }

    /// Prunes unneeded informers every `cleanup_interval` until shutdown.
    pub async fn run_cleaner(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let shutdown = self.shutdown.clone().signaled();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::debug!("Shutdown");
                    return;
                }
                _ = async {
                    ticker.tick().await;
                    self.prune(&self.desired.desired_watches()).await;
                } => {}
            }
        }
    }

    /// Ensures every desired source has a started informer and removes the rest.
    pub async fn reconcile(&self) {
        let desired = self.desired.desired_watches();
        let now = time::Instant::now();

        for (descriptor, requesters) in &desired {
            let informer = self.registry.register_informer(descriptor);
            informer.set_requesters(requesters.clone());

            // A blocked informer is mid-teardown. Finish removing it so that it can be recreated
            // on a later tick.
            if informer.is_blocked() {
                if let Err(error) = self.registry.destroy_informer(descriptor).await {
                    tracing::warn!(%error, "Informer is still stopping");
                }
                continue;
            }

            if let Some(retry_at) = self.failures.retry_at(descriptor) {
                if now < retry_at {
                    tracing::trace!(%descriptor, "Backing off");
                    continue;
                }
            }

            if informer.try_start() {
                self.start(informer);
            }
        }

        self.prune(&desired).await;
        self.metrics.set_informers(self.registry.len());
    }

    /// Removes every informer that isn't desired.
    pub async fn prune(&self, desired: &Desired) {
        for descriptor in self.registry.descriptors() {
            if desired.contains_key(&descriptor) {
                continue;
            }

            self.failures.clear(&descriptor);
            match self.registry.destroy_informer(&descriptor).await {
                Ok(()) => tracing::info!(%descriptor, "Stopped watch"),
                Err(error) => tracing::warn!(%error, "Failed to stop watch"),
            }
        }
        self.metrics.set_informers(self.registry.len());
    }

    fn start(&self, informer: Arc<Informer>) {
        let descriptor = informer.descriptor().clone();
        tracing::info!(%descriptor, requesters = ?informer.requesters(), "Starting watch");

        let events = self.watches.watch(&descriptor);
        let task = WatchTask {
            informer: informer.clone(),
            registry: self.registry.clone(),
            failures: self.failures.clone(),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(
            task.run(events, self.shutdown.clone())
                .instrument(info_span!("watch", %descriptor)),
        );

        // Wait for the watch to acknowledge the start without delaying the reconciler.
        let mut state = informer.subscribe();
        let timeout = self.config.ack_timeout;
        tokio::spawn(async move {
            let acked = time::timeout(timeout, async move {
                state
                    .wait_for(|s| s.phase != Phase::Starting)
                    .await
                    .map(|s| s.phase == Phase::Started)
                    .unwrap_or(false)
            })
            .await;
            match acked {
                Ok(true) => tracing::debug!(%descriptor, "Watch acknowledged"),
                Ok(false) => {}
                Err(_) => tracing::warn!(%descriptor, ?timeout, "Watch did not start in time"),
            }
        });
    }
}

// === impl WatchTask ===

impl WatchTask {
    async fn run(self, mut events: EventStream, shutdown: drain::Watch) {
        let descriptor = self.informer.descriptor().clone();
        let mut started = false;
        let mut init = None;

        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::debug!("Shutdown");
                    break;
                }
                _ = self.informer.blocked() => {
                    tracing::debug!("Blocked");
                    break;
                }
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if !started {
                            started = true;
                            self.informer.mark_started();
                            self.failures.clear(&descriptor);
                            self.metrics.started(&descriptor);
                            tracing::info!("Watch started");
                        }
                        apply_event(&self.registry, &descriptor, &mut init, event);
                    }
                    Some(Err(error)) if started => {
                        tracing::warn!(%error, "Watch failed");
                    }
                    Some(Err(error)) => {
                        let retry_in = self.failures.record(&descriptor);
                        self.metrics.start_failed(&descriptor);
                        tracing::warn!(%error, ?retry_in, "Failed to start watch");
                        break;
                    }
                    None if started => {
                        tracing::info!("Watch ended");
                        break;
                    }
                    None => {
                        let retry_in = self.failures.record(&descriptor);
                        self.metrics.start_failed(&descriptor);
                        tracing::warn!(?retry_in, "Watch ended before it started");
                        break;
                    }
                },
            }
        }

        self.informer.mark_stopped();
        self.metrics.stopped(&descriptor);
    }
}

/// Mirrors a watch event into the registry.
///
/// Objects listed during a watch's initial sync are buffered and replace the cached items once
/// the sync completes.
fn apply_event(
    registry: &ResourceRegistry,
    descriptor: &SourceDescriptor,
    init: &mut Option<Vec<Value>>,
    event: watcher::Event<Value>,
) {
    match event {
        watcher::Event::Apply(obj) => registry.add_resource(descriptor, &obj),
        watcher::Event::Delete(obj) => registry.remove_resource(descriptor, &obj),
        watcher::Event::Init => *init = Some(Vec::new()),
        watcher::Event::InitApply(obj) => init.get_or_insert_with(Vec::new).push(obj),
        watcher::Event::InitDone => {
            let objects = init.take().unwrap_or_default();
            tracing::debug!(items = objects.len(), "Synced");
            registry.reset_resources(descriptor, objects);
        }
    }
}

// === impl Failures ===

impl Failures {
    /// Records a failed start and returns the time until the next attempt.
    fn record(&self, descriptor: &SourceDescriptor) -> Duration {
        let mut by_source = self.by_source.lock();
        let backoff = by_source.entry(descriptor.clone()).or_insert(Backoff {
            failures: 0,
            retry_at: time::Instant::now(),
        });
        backoff.failures = backoff.failures.saturating_add(1);
        let delay = backoff_delay(self.base, self.max, backoff.failures);
        backoff.retry_at = time::Instant::now() + delay;
        delay
    }

    fn retry_at(&self, descriptor: &SourceDescriptor) -> Option<time::Instant> {
        self.by_source.lock().get(descriptor).map(|b| b.retry_at)
    }

    fn clear(&self, descriptor: &SourceDescriptor) {
        self.by_source.lock().remove(descriptor);
    }
}

fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(300);
        let delays = (1..=10)
            .map(|n| backoff_delay(base, max, n).as_secs())
            .collect::<Vec<_>>();
        assert_eq!(delays, [2, 4, 8, 16, 32, 64, 128, 256, 300, 300]);
        assert_eq!(backoff_delay(base, max, u32::MAX), max);
    }
}
