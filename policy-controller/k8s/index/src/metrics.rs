use kpolicy_core::SourceDescriptor;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Default)]
pub struct InformerMetrics {
    informers: Gauge,
    starts: Family<SourceLabels, Counter>,
    start_failures: Family<SourceLabels, Counter>,
    stops: Family<SourceLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SourceLabels {
    group: String,
    version: String,
    resource: String,
    namespace: String,
}

impl InformerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let informers = Gauge::default();
        prom.register(
            "informers",
            "Gauge of the number of registered source informers",
            informers.clone(),
        );

        let starts = Family::default();
        prom.register(
            "informer_starts",
            "Count of source watches that started",
            starts.clone(),
        );

        let start_failures = Family::default();
        prom.register(
            "informer_start_failures",
            "Count of source watches that failed before observing any event",
            start_failures.clone(),
        );

        let stops = Family::default();
        prom.register(
            "informer_stops",
            "Count of source watches that stopped",
            stops.clone(),
        );

        Self {
            informers,
            starts,
            start_failures,
            stops,
        }
    }

    pub(crate) fn set_informers(&self, n: usize) {
        self.informers.set(n as i64);
    }

    pub(crate) fn started(&self, descriptor: &SourceDescriptor) {
        self.starts.get_or_create(&descriptor.into()).inc();
    }

    pub(crate) fn start_failed(&self, descriptor: &SourceDescriptor) {
        self.start_failures.get_or_create(&descriptor.into()).inc();
    }

    pub(crate) fn stopped(&self, descriptor: &SourceDescriptor) {
        self.stops.get_or_create(&descriptor.into()).inc();
    }
}

impl From<&SourceDescriptor> for SourceLabels {
    fn from(d: &SourceDescriptor) -> Self {
        Self {
            group: d.gvr.group.clone(),
            version: d.gvr.version.clone(),
            resource: d.gvr.resource.clone(),
            namespace: d.namespace.clone().unwrap_or_default(),
        }
    }
}
