use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    requests: Family<RequestLabels, Counter>,
    evaluations: Family<EvaluationLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    kind: &'static str,
    verdict: Verdict,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EvaluationLabels {
    kind: &'static str,
    result: EvaluationResult,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum Verdict {
    Allowed,
    Denied,
    Invalid,
}

/// The outcome of evaluating one policy's conditions.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum EvaluationResult {
    Pass,
    Fail,
    Error,
}

impl AdmissionMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let requests = Family::default();
        prom.register(
            "admission_requests",
            "Count of admission requests by endpoint and verdict",
            requests.clone(),
        );

        let evaluations = Family::default();
        prom.register(
            "policy_evaluations",
            "Count of policy evaluations by policy kind and result",
            evaluations.clone(),
        );

        Self {
            requests,
            evaluations,
        }
    }

    pub(crate) fn request(&self, kind: &'static str, verdict: Verdict) {
        self.requests
            .get_or_create(&RequestLabels { kind, verdict })
            .inc();
    }

    pub(crate) fn evaluation(&self, kind: &'static str, result: EvaluationResult) {
        self.evaluations
            .get_or_create(&EvaluationLabels { kind, result })
            .inc();
    }
}
