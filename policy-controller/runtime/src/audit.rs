//! Records policy outcomes as Kubernetes events.
//!
//! Events are published against the policy resource, with the admitted object as the secondary
//! reference, so `kubectl describe` on a policy shows its recent violations.

use k8s_openapi::api::core::v1::ObjectReference;
use kpolicy_core::POLICY_API_VERSION;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client,
};

/// A policy outcome worth surfacing to users.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditEvent {
    pub policy_kind: &'static str,
    pub policy_name: String,
    pub reason: Reason,
    pub message: String,
    pub resource: Option<ObjectReference>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    /// A validation policy's conditions failed.
    Violation,
    /// A policy's action could not be rendered or applied.
    Error,
}

/// Receives audit events. Emission must not block the caller.
pub trait AuditSink: Send + Sync + 'static {
    fn emit(&self, event: AuditEvent);
}

/// Publishes audit events through the events API.
#[derive(Clone)]
pub struct KubeAudit {
    recorder: Recorder,
}

// === impl AuditEvent ===

impl AuditEvent {
    fn policy_ref(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(POLICY_API_VERSION.to_string()),
            kind: Some(self.policy_kind.to_string()),
            name: Some(self.policy_name.clone()),
            ..Default::default()
        }
    }
}

// === impl Reason ===

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Violation => "PolicyViolation",
            Self::Error => "PolicyError",
        }
    }
}

// === impl KubeAudit ===

impl KubeAudit {
    pub fn new(client: Client, controller: String) -> Self {
        let reporter = Reporter {
            controller,
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

impl AuditSink for KubeAudit {
    fn emit(&self, event: AuditEvent) {
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            let reference = event.policy_ref();
            let ev = Event {
                type_: EventType::Warning,
                reason: event.reason.as_str().to_string(),
                note: Some(event.message.clone()),
                action: "Admission".to_string(),
                secondary: event.resource.clone(),
            };
            if let Err(error) = recorder.publish(&ev, &reference).await {
                tracing::warn!(
                    %error,
                    kind = event.policy_kind,
                    name = %event.policy_name,
                    "Failed to publish audit event",
                );
            }
        });
    }
}
