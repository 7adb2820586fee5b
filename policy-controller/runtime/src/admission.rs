//! The admission webhook server.
//!
//! Every endpoint accepts a `POST`ed `AdmissionReview` and always answers with a well-formed
//! review, even when the request can't be evaluated:
//!
//! - `/validate` evaluates validation policies and denies the request if an enforcing policy
//!   fails.
//! - `/mutate` evaluates mutation policies in priority order and returns their combined patch.
//! - `/generate` evaluates generation policies and applies the objects they render.
//! - `/policies` rejects policy resources that can't be converted into active policies.

use crate::{
    apply::ObjectApplier,
    audit::{AuditEvent, AuditSink, Reason},
    metrics::{AdmissionMetrics, Verdict},
};
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use k8s_openapi::api::core::v1::ObjectReference;
use kpolicy_core::{CachedItem, GroupVersionResource, Operation, PolicyObject, Registry};
use kpolicy_k8s_api::policy as k8s;
use kpolicy_k8s_index::{convert, Policies, ResourceRegistry};
use kpolicy_template::{Evaluator, InjectedData};
use kube::{core::DynamicObject, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

mod eval;
mod generate;
mod mutate;
mod validate;


#[derive(Clone)]
pub struct Admission {
    policies: Arc<Policies>,
    sources: Arc<ResourceRegistry>,
    evaluator: Arc<Evaluator>,
    audit: Arc<dyn AuditSink>,
    applier: Arc<dyn ObjectApplier>,
    metrics: AdmissionMetrics,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Validate,
    Mutate,
    Generate,
    Policies,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

/// An admission request, reduced to what policies are evaluated against.
#[derive(Clone, Debug)]
pub(crate) struct Subject {
    operation: Operation,
    gvr: GroupVersionResource,
    namespace: Option<String>,
    name: Option<String>,
    object: Option<Value>,
    old_object: Option<Value>,
    reference: ObjectReference,
}

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        let endpoint = match Endpoint::from_path(req.uri().path()) {
            Some(endpoint) if req.method() == http::Method::POST => endpoint,
            _ => {
                return Box::pin(future::ok(
                    Response::builder()
                        .status(http::StatusCode::NOT_FOUND)
                        .body(Body::default())
                        .expect("not found response must be valid"),
                ))
            }
        };

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: AdmissionReview = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    admission.metrics.request(endpoint.as_str(), Verdict::Invalid);
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(endpoint, req)
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    admission.metrics.request(endpoint.as_str(), Verdict::Invalid);
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(
        policies: Arc<Policies>,
        sources: Arc<ResourceRegistry>,
        audit: Arc<dyn AuditSink>,
        applier: Arc<dyn ObjectApplier>,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            policies,
            sources,
            evaluator: Arc::new(Evaluator::default()),
            audit,
            applier,
            metrics,
        }
    }

    fn admit(&self, endpoint: Endpoint, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = match endpoint {
            Endpoint::Policies => self.admit_policy(req),
            endpoint => {
                let rsp = AdmissionResponse::from(&req);
                match Subject::from_request(&req) {
                    Ok(subject) => match endpoint {
                        Endpoint::Validate => self.validate(&subject, rsp),
                        Endpoint::Mutate => self.mutate(&subject, rsp),
                        _ => self.generate(&subject, rsp),
                    },
                    Err(error) => {
                        info!(%error, "Malformed admission request");
                        // Malformed objects are rejected by validation and passed through
                        // unchanged otherwise.
                        match endpoint {
                            Endpoint::Validate => rsp.deny(error),
                            _ => rsp,
                        }
                    }
                }
            }
        };

        let verdict = if rsp.allowed {
            Verdict::Allowed
        } else {
            Verdict::Denied
        };
        self.metrics.request(endpoint.as_str(), verdict);
        rsp
    }

    /// Rejects policy resources that would fail to convert when indexed.
    fn admit_policy(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        if matches!(req.operation, kube::core::admission::Operation::Delete) {
            return rsp;
        }

        let kind = req.kind.kind.clone();
        let converted = if is_kind::<k8s::ValidationPolicy>(&req) {
            parse_spec(req).and_then(|(name, spec)| {
                convert::validation(name, spec, &self.evaluator).map(drop)
            })
        } else if is_kind::<k8s::MutationPolicy>(&req) {
            parse_spec(req)
                .and_then(|(name, spec)| convert::mutation(name, spec, &self.evaluator).map(drop))
        } else if is_kind::<k8s::GenerationPolicy>(&req) {
            parse_spec(req).and_then(|(name, spec)| {
                convert::generation(name, spec, &self.evaluator).map(drop)
            })
        } else {
            return AdmissionResponse::invalid(format_args!(
                "unsupported resource type: {}.{}.{}",
                req.kind.group, req.kind.version, req.kind.kind
            ));
        };

        match converted {
            Ok(()) => rsp,
            Err(error) => {
                let error = format!("{error:#}");
                info!(%error, %kind, "Denied");
                rsp.deny(error)
            }
        }
    }

    fn record<P: PolicyObject>(
        &self,
        policy: &P,
        subject: &Subject,
        reason: Reason,
        message: String,
    ) {
        self.audit.emit(AuditEvent {
            policy_kind: P::KIND,
            policy_name: policy.name().to_string(),
            reason,
            message,
            resource: Some(subject.reference.clone()),
        });
    }
}

// === impl Endpoint ===

impl Endpoint {
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/validate" => Some(Self::Validate),
            "/mutate" => Some(Self::Mutate),
            "/generate" => Some(Self::Generate),
            "/policies" => Some(Self::Policies),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Mutate => "mutate",
            Self::Generate => "generate",
            Self::Policies => "policies",
        }
    }
}

// === impl Subject ===

impl Subject {
    fn from_request(req: &AdmissionRequest) -> Result<Self> {
        use kube::core::admission::Operation as Op;

        let operation = match req.operation {
            Op::Create => Operation::Create,
            Op::Update => Operation::Update,
            Op::Delete => Operation::Delete,
            Op::Connect => Operation::Connect,
        };
        let object = req.object.as_ref().map(serde_json::to_value).transpose()?;
        let old_object = req
            .old_object
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let (object, old_object) = match operation {
            Operation::Update => {
                if old_object.is_none() {
                    return Err(anyhow!("update request missing 'oldObject'"));
                }
                (object, old_object)
            }
            // Deleted objects are only sent as the old object.
            Operation::Delete => (object.or(old_object), None),
            _ => (object, None),
        };

        let name = Some(req.name.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| {
                req.object
                    .as_ref()
                    .or(req.old_object.as_ref())
                    .and_then(|o| o.metadata.name.clone())
            });
        let reference = ObjectReference {
            api_version: Some(req.kind.api_version()),
            kind: Some(req.kind.kind.clone()),
            namespace: req.namespace.clone(),
            name: name.clone(),
            uid: req
                .object
                .as_ref()
                .or(req.old_object.as_ref())
                .and_then(|o| o.metadata.uid.clone()),
            ..Default::default()
        };

        Ok(Self {
            operation,
            gvr: GroupVersionResource::new(
                &req.resource.group,
                &req.resource.version,
                &req.resource.resource,
            ),
            namespace: req.namespace.clone(),
            name,
            object,
            old_object,
            reference,
        })
    }

    fn key(&self) -> String {
        self.gvr.admission_key(self.operation)
    }

    /// Returns the policies routed to this request that also select its namespace and name.
    fn policies<T: PolicyObject>(&self, registry: &Registry<T>) -> Vec<Arc<T>> {
        registry
            .get(&self.key())
            .iter()
            .filter(|p| {
                p.watched()
                    .matches_object(self.namespace.as_deref(), self.name.as_deref())
            })
            .cloned()
            .collect()
    }

    /// Builds an evaluation context. `object` is the object's current state, which differs from
    /// the requested object once mutations have been applied.
    fn data<'a>(
        &'a self,
        object: Option<&'a Value>,
        sources: &'a [Vec<Arc<CachedItem>>],
    ) -> InjectedData<'a> {
        InjectedData {
            operation: self.operation.as_str(),
            object,
            old_object: self.old_object.as_ref(),
            sources: sources
                .iter()
                .map(|items| items.iter().map(|item| &item.object).collect())
                .collect(),
            vars: Map::new(),
        }
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_spec<T: DeserializeOwned>(req: AdmissionRequest) -> Result<(String, T)> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value(data)?
    };

    Ok((obj.name_any(), spec))
}

/// Parses rendered patch or object text, which may be JSON or YAML.
fn parse_document(text: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    serde_yaml::from_str(text).map_err(|error| anyhow!("document is neither JSON nor YAML: {error}"))
}
