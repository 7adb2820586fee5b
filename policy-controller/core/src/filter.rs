//! Source filters narrow the items of a watched source collection down to those a policy reads.
//!
//! A name or namespace filter is either an explicit list or a regular expression. When both are
//! configured the list takes precedence and the regex is ignored. A regex filter may be negated.
//! Metadata filters require every configured label and annotation to be present with an equal
//! value.
//!
//! Filter strings may embed expressions that are resolved against the admission request before
//! matching; [`SourceFilter::resolve`] visits each string field and produces a resolved copy.

use crate::CachedItem;
use regex::Regex;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceFilter {
    pub namespace: Option<NameFilter>,
    pub name: Option<NameFilter>,
    pub metadata: Option<MetadataFilter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameFilter {
    pub match_list: Vec<String>,
    pub match_regex: Option<RegexFilter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegexFilter {
    pub expression: String,
    pub negative: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// A resolved filter with its regular expressions compiled.
#[derive(Clone, Debug, Default)]
pub struct Matcher {
    namespace: Option<NameMatcher>,
    name: Option<NameMatcher>,
    metadata: Option<MetadataFilter>,
}

#[derive(Clone, Debug)]
enum NameMatcher {
    List(Vec<String>),
    Regex { regex: Regex, negative: bool },
    Any,
}

// === impl SourceFilter ===

impl SourceFilter {
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none() && self.name.is_none() && self.metadata.is_none()
    }

    /// Returns a copy of this filter with every string field passed through `f`.
    pub fn resolve<E>(&self, mut f: impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        Ok(Self {
            namespace: self
                .namespace
                .as_ref()
                .map(|n| n.resolve(&mut f))
                .transpose()?,
            name: self.name.as_ref().map(|n| n.resolve(&mut f)).transpose()?,
            metadata: self
                .metadata
                .as_ref()
                .map(|m| m.resolve(&mut f))
                .transpose()?,
        })
    }

    /// Visits every string field of the filter.
    pub fn strings(&self) -> impl Iterator<Item = &str> + '_ {
        let names = [self.namespace.as_ref(), self.name.as_ref()]
            .into_iter()
            .flatten()
            .flat_map(|n| {
                n.match_list
                    .iter()
                    .map(String::as_str)
                    .chain(n.match_regex.iter().map(|r| r.expression.as_str()))
            });
        let metadata = self.metadata.iter().flat_map(|m| {
            m.labels
                .values()
                .chain(m.annotations.values())
                .map(String::as_str)
        });
        names.chain(metadata)
    }

    pub fn compile(&self) -> Result<Matcher, regex::Error> {
        Ok(Matcher {
            namespace: self.namespace.as_ref().map(NameFilter::compile).transpose()?,
            name: self.name.as_ref().map(NameFilter::compile).transpose()?,
            metadata: self.metadata.clone(),
        })
    }
}

impl NameFilter {
    fn resolve<E>(&self, f: &mut impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        Ok(Self {
            match_list: self
                .match_list
                .iter()
                .map(|s| f(s))
                .collect::<Result<_, E>>()?,
            match_regex: self
                .match_regex
                .as_ref()
                .map(|r| {
                    Ok(RegexFilter {
                        expression: f(&r.expression)?,
                        negative: r.negative,
                    })
                })
                .transpose()?,
        })
    }

    fn compile(&self) -> Result<NameMatcher, regex::Error> {
        if !self.match_list.is_empty() {
            return Ok(NameMatcher::List(self.match_list.clone()));
        }
        match &self.match_regex {
            Some(RegexFilter {
                expression,
                negative,
            }) => Ok(NameMatcher::Regex {
                regex: Regex::new(expression)?,
                negative: *negative,
            }),
            None => Ok(NameMatcher::Any),
        }
    }
}

impl MetadataFilter {
    fn resolve<E>(&self, f: &mut impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        Ok(Self {
            labels: resolve_values(&self.labels, &mut *f)?,
            annotations: resolve_values(&self.annotations, &mut *f)?,
        })
    }

    fn matches(&self, item: &CachedItem) -> bool {
        is_subset(&self.labels, &item.labels) && is_subset(&self.annotations, &item.annotations)
    }
}

fn resolve_values<E>(
    map: &BTreeMap<String, String>,
    f: &mut impl FnMut(&str) -> Result<String, E>,
) -> Result<BTreeMap<String, String>, E> {
    map.iter().map(|(k, v)| Ok((k.clone(), f(v)?))).collect()
}

fn is_subset(required: &BTreeMap<String, String>, actual: &BTreeMap<String, String>) -> bool {
    required.iter().all(|(k, v)| actual.get(k) == Some(v))
}

// === impl Matcher ===

impl Matcher {
    pub fn matches(&self, item: &CachedItem) -> bool {
        if let Some(ns) = &self.namespace {
            if !ns.matches(item.namespace.as_deref().unwrap_or_default()) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !name.matches(&item.name) {
                return false;
            }
        }
        if let Some(metadata) = &self.metadata {
            if !metadata.matches(item) {
                return false;
            }
        }
        true
    }
}

impl NameMatcher {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::List(list) => list.iter().any(|v| v == value),
            Self::Regex { regex, negative } => regex.is_match(value) != *negative,
            Self::Any => true,
        }
    }
}
