use super::{Admission, AdmissionResponse, Subject};
use crate::audit::Reason;
use kpolicy_core::{FailureAction, PolicyObject, ValidationPolicy};
use tracing::{debug, info, info_span, warn};

impl Admission {
    /// Evaluates validation policies in registration order.
    ///
    /// The first failing `Enforce` policy denies the request and no further policies are
    /// evaluated. Failing `Permissive` policies add a warning to the response, and failing `Audit`
    /// policies are only recorded.
    pub(super) fn validate(&self, subject: &Subject, rsp: AdmissionResponse) -> AdmissionResponse {
        let mut warnings = Vec::new();
        for policy in subject.policies(&self.policies.validation) {
            let _span = info_span!("validate", policy = %policy.name).entered();

            let selected = self.select_sources(&*policy, subject, subject.object.as_ref());
            let mut data = subject.data(subject.object.as_ref(), &selected);
            if self.check_conditions(&*policy, &mut data) {
                debug!("Passed");
                continue;
            }

            let message = self
                .evaluator
                .render(policy.message.engine, &policy.message.template, &data)
                .unwrap_or_else(|error| {
                    warn!(%error, "Failed to render message");
                    default_message(&policy)
                });
            self.record(&*policy, subject, Reason::Violation, message.clone());

            match policy.failure_action {
                FailureAction::Enforce => {
                    info!(%message, "Denied");
                    return with_warnings(rsp.deny(message), warnings);
                }
                FailureAction::Permissive => {
                    info!(%message, "Allowed with warning");
                    warnings.push(message);
                }
                FailureAction::Audit => {
                    info!(%message, "Audited");
                }
            }
        }

        with_warnings(rsp, warnings)
    }
}

fn default_message(policy: &ValidationPolicy) -> String {
    format!("request denied by {}", policy.requester())
}

fn with_warnings(mut rsp: AdmissionResponse, warnings: Vec<String>) -> AdmissionResponse {
    if !warnings.is_empty() {
        rsp.warnings = Some(warnings);
    }
    rsp
}
