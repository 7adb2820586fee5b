#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use kpolicy_core as core;
pub use kpolicy_k8s_api as k8s;
pub use kpolicy_k8s_index as index;
pub use kpolicy_template as template;

mod admission;
mod apply;
mod args;
mod audit;
mod metrics;

pub use self::{
    admission::{Admission, Endpoint},
    apply::{KubeApplier, ObjectApplier},
    args::Args,
    audit::{AuditEvent, AuditSink, KubeAudit, Reason},
    metrics::AdmissionMetrics,
};
