use super::{parse_document, Admission, AdmissionResponse, Subject};
use crate::audit::Reason;
use anyhow::{ensure, Result};
use json_patch::PatchOperation;
use kpolicy_core::PatchType;
use serde_json::Value;
use tracing::{debug, info_span, warn};

impl Admission {
    pub(super) fn mutate(&self, subject: &Subject, rsp: AdmissionResponse) -> AdmissionResponse {
        let operations = self.patch(subject);
        if operations.is_empty() {
            return rsp;
        }

        match rsp.clone().with_patch(json_patch::Patch(operations)) {
            Ok(rsp) => rsp,
            Err(error) => {
                warn!(%error, "Failed to encode patch");
                rsp
            }
        }
    }

    /// Applies every passing mutation policy, in ascending priority order, and returns a patch
    /// from the requested object to the final state.
    ///
    /// Each policy sees the object as patched by the policies before it. A policy whose patch
    /// can't be rendered or applied is skipped.
    pub(super) fn patch(&self, subject: &Subject) -> Vec<PatchOperation> {
        let Some(object) = subject.object.as_ref() else {
            return Vec::new();
        };

        let mut current = object.clone();
        let mut operations = Vec::new();
        for policy in subject.policies(&self.policies.mutation) {
            let _span = info_span!("mutate", policy = %policy.name).entered();

            let selected = self.select_sources(&*policy, subject, Some(&current));
            let rendered = {
                let mut data = subject.data(Some(&current), &selected);
                if !self.check_conditions(&*policy, &mut data) {
                    debug!("Skipped");
                    continue;
                }
                self.evaluator
                    .render(policy.patch.engine, &policy.patch.template, &data)
            };

            let patched = rendered
                .map_err(anyhow::Error::from)
                .and_then(|text| apply_patch(&current, policy.patch_type, &text));
            match patched {
                Ok(next) => {
                    let diff = json_patch::diff(&current, &next);
                    debug!(operations = diff.0.len(), "Patched");
                    operations.extend(diff.0);
                    current = next;
                }
                Err(error) => {
                    let message = format!("failed to apply patch: {error:#}");
                    warn!(%message, "Skipped");
                    self.record(&*policy, subject, Reason::Error, message);
                }
            }
        }

        operations
    }
}

fn apply_patch(current: &Value, patch_type: PatchType, text: &str) -> Result<Value> {
    let doc = parse_document(text)?;
    let mut next = current.clone();
    match patch_type {
        PatchType::Json => {
            let patch = serde_json::from_value::<json_patch::Patch>(doc)?;
            json_patch::patch(&mut next, &patch.0)?;
        }
        PatchType::Merge => {
            ensure!(doc.is_object(), "merge patch must be an object");
            json_patch::merge(&mut next, &doc);
        }
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn applies_json_and_merge_patches() {
        let object = json!({ "metadata": { "name": "web" }, "spec": { "replicas": 3 } });

        let patched = apply_patch(
            &object,
            PatchType::Json,
            r#"[{"op": "replace", "path": "/spec/replicas", "value": 5}]"#,
        )
        .unwrap();
        assert_eq!(patched["spec"]["replicas"], 5);

        let patched = apply_patch(
            &object,
            PatchType::Merge,
            "metadata:\n  labels:\n    tier: web\n",
        )
        .unwrap();
        assert_eq!(patched["metadata"]["labels"]["tier"], "web");
        assert_eq!(patched["spec"]["replicas"], 3);
    }

    #[test]
    fn rejects_invalid_patches() {
        let object = json!({ "spec": {} });
        assert!(apply_patch(
            &object,
            PatchType::Json,
            r#"[{"op": "remove", "path": "/spec/missing"}]"#
        )
        .is_err());
        assert!(apply_patch(&object, PatchType::Json, r#"{"spec": {}}"#).is_err());
        assert!(apply_patch(&object, PatchType::Merge, "[]").is_err());
    }
}
