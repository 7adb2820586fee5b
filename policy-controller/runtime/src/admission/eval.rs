use super::{Admission, Subject};
use crate::metrics::EvaluationResult;
use anyhow::Result;
use kpolicy_core::{filter::Matcher, CachedItem, Condition, PolicyObject, SourceFilter};
use kpolicy_template::{has_expressions, Engine, Evaluator, InjectedData};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Admission {
    /// Snapshots the items of each of `policy`'s sources that pass the source's filter.
    ///
    /// Filter strings may embed expressions, which are resolved against the request first. A
    /// filter that can't be resolved selects nothing.
    pub(super) fn select_sources<P: PolicyObject>(
        &self,
        policy: &P,
        subject: &Subject,
        object: Option<&Value>,
    ) -> Vec<Vec<Arc<CachedItem>>> {
        let data = subject.data(object, &[]);
        policy
            .sources()
            .iter()
            .map(|source| {
                let items = self.sources.get_resources(&source.descriptor);
                if source.filter.is_empty() {
                    return items.to_vec();
                }
                match matcher(&self.evaluator, &source.filter, &data) {
                    Ok(matcher) => items.iter().filter(|i| matcher.matches(i)).cloned().collect(),
                    Err(error) => {
                        warn!(
                            source = %source.descriptor,
                            error = format_args!("{error:#}"),
                            "Failed to resolve source filter"
                        );
                        Vec::new()
                    }
                }
            })
            .collect()
    }

    /// Evaluates `policy`'s conditions in order. Variables assigned by a condition are visible to
    /// the conditions after it.
    pub(super) fn check_conditions<P: PolicyObject>(
        &self,
        policy: &P,
        data: &mut InjectedData<'_>,
    ) -> bool {
        let result = evaluate_conditions(&self.evaluator, policy.conditions(), data);
        self.metrics.evaluation(P::KIND, result);
        result == EvaluationResult::Pass
    }
}

fn matcher(evaluator: &Evaluator, filter: &SourceFilter, data: &InjectedData<'_>) -> Result<Matcher> {
    let resolved = filter.resolve(|s| {
        if has_expressions(s) {
            evaluator.render(Engine::Plain, s, data)
        } else {
            Ok(s.to_string())
        }
    })?;
    Ok(resolved.compile()?)
}

/// A condition that can't be evaluated fails.
fn evaluate_conditions(
    evaluator: &Evaluator,
    conditions: &[Condition],
    data: &mut InjectedData<'_>,
) -> EvaluationResult {
    for condition in conditions {
        match evaluator.evaluate(condition.engine, &condition.key, data) {
            Ok(evaluation) => {
                if let Some(vars) = evaluation.vars {
                    data.vars = vars;
                }
                if evaluation.output.trim() != condition.value.trim() {
                    debug!(
                        condition = %condition.name,
                        output = %evaluation.output,
                        expected = %condition.value,
                        "Condition failed"
                    );
                    return EvaluationResult::Fail;
                }
            }
            Err(error) => {
                info!(condition = %condition.name, %error, "Failed to evaluate condition");
                return EvaluationResult::Error;
            }
        }
    }
    EvaluationResult::Pass
}
