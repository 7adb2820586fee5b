use super::{parse_document, Admission, AdmissionResponse, Subject};
use crate::audit::Reason;
use anyhow::{ensure, Result};
use kpolicy_core::PolicyObject;
use serde_json::Value;
use tracing::{debug, info, info_span, warn};

impl Admission {
    /// Renders the object of every passing generation policy and hands it to the applier.
    ///
    /// Generation never blocks the request.
    pub(super) fn generate(&self, subject: &Subject, rsp: AdmissionResponse) -> AdmissionResponse {
        for policy in subject.policies(&self.policies.generation) {
            let _span = info_span!("generate", policy = %policy.name).entered();

            let selected = self.select_sources(&*policy, subject, subject.object.as_ref());
            let mut data = subject.data(subject.object.as_ref(), &selected);
            if !self.check_conditions(&*policy, &mut data) {
                debug!("Skipped");
                continue;
            }

            let object = self
                .evaluator
                .render(policy.object.engine, &policy.object.template, &data)
                .map_err(anyhow::Error::from)
                .and_then(|text| generated_object(&text));
            match object {
                Ok(object) => {
                    info!("Generating object");
                    self.applier.apply(policy.requester(), object);
                }
                Err(error) => {
                    let message = format!("failed to render object: {error:#}");
                    warn!(%message, "Skipped");
                    self.record(&*policy, subject, Reason::Error, message);
                }
            }
        }

        rsp
    }
}

fn generated_object(text: &str) -> Result<Value> {
    let object = parse_document(text)?;
    let set = |pointer: &str| {
        object
            .pointer(pointer)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    };
    ensure!(set("/apiVersion"), "generated object must set apiVersion");
    ensure!(set("/kind"), "generated object must set kind");
    ensure!(set("/metadata/name"), "generated object must set metadata.name");
    Ok(object)
}
