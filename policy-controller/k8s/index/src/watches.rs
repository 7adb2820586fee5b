use futures::{prelude::*, stream::BoxStream};
use kpolicy_core::SourceDescriptor;
use kube::{
    api::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use serde_json::Value;

/// A stream of watch events for a source collection. Objects are untyped.
pub type EventStream = BoxStream<'static, Result<watcher::Event<Value>, watcher::Error>>;

/// Opens watches on source collections.
pub trait WatchSource: Send + Sync + 'static {
    fn watch(&self, descriptor: &SourceDescriptor) -> EventStream;
}

/// Watches source collections through the Kubernetes API.
#[derive(Clone)]
pub struct KubeWatches {
    client: Client,
    config: watcher::Config,
}

// === impl KubeWatches ===

impl KubeWatches {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            config: watcher::Config::default(),
        }
    }

    fn api(&self, descriptor: &SourceDescriptor) -> Api<DynamicObject> {
        let gvr = &descriptor.gvr;
        let gvk = GroupVersionKind::gvk(&gvr.group, &gvr.version, "");
        let resource = ApiResource::from_gvk_with_plural(&gvk, &gvr.resource);
        match descriptor.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

impl WatchSource for KubeWatches {
    fn watch(&self, descriptor: &SourceDescriptor) -> EventStream {
        let mut config = self.config.clone();
        if let Some(name) = descriptor.name.as_deref() {
            config = config.fields(&format!("metadata.name={name}"));
        }

        watcher(self.api(descriptor), config)
            .default_backoff()
            .map_ok(into_json)
            .boxed()
    }
}

fn into_json(event: watcher::Event<DynamicObject>) -> watcher::Event<Value> {
    fn json(obj: DynamicObject) -> Value {
        serde_json::to_value(obj).unwrap_or_else(|error| {
            tracing::warn!(%error, "Failed to encode object");
            Value::Null
        })
    }

    match event {
        watcher::Event::Apply(obj) => watcher::Event::Apply(json(obj)),
        watcher::Event::Delete(obj) => watcher::Event::Delete(json(obj)),
        watcher::Event::Init => watcher::Event::Init,
        watcher::Event::InitApply(obj) => watcher::Event::InitApply(json(obj)),
        watcher::Event::InitDone => watcher::Event::InitDone,
    }
}
