//! Converts policy resources into their core representation.
//!
//! Conversion is also the validation performed when policy resources are admitted: every engine
//! name, operation and patch type must be known, and every template must parse.

use anyhow::{ensure, Context, Result};
use kpolicy_core::{
    filter, Condition, Engine, FailureAction, GenerationPolicy, GroupVersionResource,
    MutationPolicy, Operation, PatchType, SourceDescriptor, SourceSelector, Template,
    ValidationPolicy, WatchedResource,
};
use kpolicy_k8s_api::policy as k8s;
use kpolicy_template::{has_expressions, Evaluator};
use std::collections::BTreeSet;

pub fn validation(
    name: String,
    spec: k8s::ValidationPolicySpec,
    evaluator: &Evaluator,
) -> Result<ValidationPolicy> {
    Ok(ValidationPolicy {
        watched: watched(spec.watch)?,
        sources: sources(spec.sources, evaluator)?,
        conditions: conditions(spec.conditions, evaluator)?,
        message: template(spec.message, evaluator).context("invalid message")?,
        failure_action: spec
            .failure_action
            .as_deref()
            .map(str::parse::<FailureAction>)
            .transpose()?
            .unwrap_or_default(),
        name,
    })
}

pub fn mutation(
    name: String,
    spec: k8s::MutationPolicySpec,
    evaluator: &Evaluator,
) -> Result<MutationPolicy> {
    Ok(MutationPolicy {
        watched: watched(spec.watch)?,
        sources: sources(spec.sources, evaluator)?,
        conditions: conditions(spec.conditions, evaluator)?,
        patch: template(spec.patch, evaluator).context("invalid patch")?,
        patch_type: spec
            .patch_type
            .as_deref()
            .map(str::parse::<PatchType>)
            .transpose()?
            .unwrap_or_default(),
        priority: spec.priority.unwrap_or_default(),
        name,
    })
}

pub fn generation(
    name: String,
    spec: k8s::GenerationPolicySpec,
    evaluator: &Evaluator,
) -> Result<GenerationPolicy> {
    Ok(GenerationPolicy {
        watched: watched(spec.watch)?,
        sources: sources(spec.sources, evaluator)?,
        conditions: conditions(spec.conditions, evaluator)?,
        object: template(spec.object, evaluator).context("invalid object")?,
        name,
    })
}

fn watched(watch: k8s::WatchedResource) -> Result<WatchedResource> {
    ensure!(!watch.version.is_empty(), "watch must specify a version");
    ensure!(!watch.resource.is_empty(), "watch must specify a resource");
    ensure!(
        !watch.operations.is_empty(),
        "watch must specify at least one operation"
    );

    let mut operations = BTreeSet::new();
    for op in &watch.operations {
        operations.extend(Operation::expand(op)?);
    }

    Ok(WatchedResource {
        gvr: GroupVersionResource::new(watch.group, watch.version, watch.resource),
        operations,
        namespace: non_empty(watch.namespace),
        name: non_empty(watch.name),
    })
}

fn sources(
    sources: Option<Vec<k8s::Source>>,
    evaluator: &Evaluator,
) -> Result<Vec<SourceSelector>> {
    sources
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(i, source)| -> Result<SourceSelector> {
            ensure!(
                !source.version.is_empty() && !source.resource.is_empty(),
                "source {i} must specify a version and resource"
            );
            let filter = source
                .filter
                .map(|f| source_filter(f, evaluator))
                .transpose()
                .with_context(|| format!("invalid filter for source {i}"))?
                .unwrap_or_default();
            Ok(SourceSelector {
                descriptor: SourceDescriptor {
                    gvr: GroupVersionResource::new(source.group, source.version, source.resource),
                    namespace: non_empty(source.namespace),
                    name: non_empty(source.name),
                },
                filter,
            })
        })
        .collect()
}

fn source_filter(f: k8s::SourceFilter, evaluator: &Evaluator) -> Result<filter::SourceFilter> {
    let filter = filter::SourceFilter {
        namespace: f.namespace.map(name_filter),
        name: f.name.map(name_filter),
        metadata: f.metadata.map(|m| filter::MetadataFilter {
            labels: m.match_labels.unwrap_or_default(),
            annotations: m.match_annotations.unwrap_or_default(),
        }),
    };

    // Filters with embedded expressions can only be compiled once the expressions are resolved
    // against a request. Until then, only the expressions themselves can be checked.
    let mut dynamic = false;
    for s in filter.strings() {
        if has_expressions(s) {
            dynamic = true;
            evaluator.check(Engine::Plain, s)?;
        }
    }
    if !dynamic {
        filter.compile()?;
    }

    Ok(filter)
}

fn name_filter(f: k8s::NameFilter) -> filter::NameFilter {
    filter::NameFilter {
        match_list: f.match_list.unwrap_or_default(),
        match_regex: f.match_regex.map(|r| filter::RegexFilter {
            expression: r.expression,
            negative: r.negative,
        }),
    }
}

fn conditions(
    conditions: Option<Vec<k8s::Condition>>,
    evaluator: &Evaluator,
) -> Result<Vec<Condition>> {
    conditions
        .into_iter()
        .flatten()
        .map(|c| -> Result<Condition> {
            let engine = engine(c.engine.as_deref())?;
            evaluator
                .check(engine, &c.key)
                .with_context(|| format!("invalid condition {:?}", c.name))?;
            Ok(Condition {
                name: c.name,
                engine,
                key: c.key,
                value: c.value,
            })
        })
        .collect()
}

fn template(t: k8s::Template, evaluator: &Evaluator) -> Result<Template> {
    let engine = engine(t.engine.as_deref())?;
    evaluator.check(engine, &t.template)?;
    Ok(Template {
        engine,
        template: t.template,
    })
}

fn engine(name: Option<&str>) -> Result<Engine> {
    match name.map(str::trim) {
        None | Some("") => Ok(Engine::default()),
        Some(name) => Ok(name.parse()?),
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}
