#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod policy;

pub use self::policy::{
    GenerationPolicy, GenerationPolicySpec, MutationPolicy, MutationPolicySpec, ValidationPolicy,
    ValidationPolicySpec,
};
pub use kube::{
    api::{Api, DynamicObject, ObjectMeta, Patch, PatchParams, ResourceExt},
    Client,
};
