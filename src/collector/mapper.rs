//! Maps parsed stats onto the exporter's metric schema.
//!
//! The schema is data (see `descriptors`): a list of metric declarations
//! and a list of routes from (command, key family, base name) to a metric.
//! Stats without a route are dropped without error, so a server version
//! that emits more or fewer stats than the table knows about still scrapes
//! cleanly.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use super::descriptors;
use super::parser::{KeyFamily, ParseError, ParsedStat};
use super::protocol::StatsCommand;
use crate::model::Sample;

/// Prefix of every metric name this exporter produces.
pub const NAMESPACE: &str = "memcached";

/// Counter or gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Only increases over the server's lifetime.
    Counter,
    /// Reflects current state.
    Gauge,
}

/// A metric as shown to the registry: full name, help, type and labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
}

/// Static, unprefixed metric declaration.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

/// How the text value of a stat becomes a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Integer or decimal.
    Number,
    /// `yes`/`no`, `true`/`false`, `on`/`off`, `1`/`0`.
    Flag,
    /// The text becomes the last label value; the sample value is 1.
    Info,
}

/// Route from one stat to one metric.
///
/// Label values of a sample are, in order: the identifiers split out of
/// the key, then `fixed_labels`, then the text value for [`Conversion::Info`].
#[derive(Debug, Clone, Copy)]
pub struct StatMapping {
    pub command: StatsCommand,
    pub family: KeyFamily,
    pub stat: &'static str,
    pub metric: &'static str,
    pub fixed_labels: &'static [&'static str],
    pub conversion: Conversion,
}

impl StatMapping {
    fn label_count(&self) -> usize {
        self.family.label_names().len()
            + self.fixed_labels.len()
            + usize::from(self.conversion == Conversion::Info)
    }
}

/// Inconsistent metric table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("metric {0} is declared twice")]
    DuplicateMetric(String),

    #[error("{command} {stat:?} ({family:?}) is mapped twice")]
    DuplicateRoute {
        command: StatsCommand,
        family: KeyFamily,
        stat: String,
    },

    #[error("{stat:?} routes to undeclared metric {metric}")]
    UnknownMetric { stat: String, metric: String },

    #[error("{stat:?} yields {got} labels but {metric} declares {want:?}")]
    LabelMismatch {
        stat: String,
        metric: String,
        got: usize,
        want: Vec<String>,
    },

    #[error("meta metric {0} is not declared")]
    MissingMeta(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct Route {
    descriptor: usize,
    fixed_labels: &'static [&'static str],
    conversion: Conversion,
}

/// A mapped sample together with the metric it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedSample<'a> {
    pub descriptor: &'a MetricDescriptor,
    pub sample: Sample,
}

/// Read-only lookup from stats to metrics. Built once, shared by all scrapes.
#[derive(Debug)]
pub struct MetricMapper {
    descriptors: Vec<MetricDescriptor>,
    by_name: HashMap<String, usize>,
    routes: HashMap<(StatsCommand, KeyFamily), HashMap<&'static str, Route>>,
    up: usize,
    scrape_duration: usize,
}

impl MetricMapper {
    /// The built-in memcached table.
    pub fn memcached() -> Result<Self, TableError> {
        Self::from_tables(NAMESPACE, descriptors::DESCRIPTORS, descriptors::MAPPINGS)
    }

    /// Builds a mapper from an arbitrary table, validating it.
    ///
    /// The table must declare the `up` and `scrape_duration_seconds` meta
    /// metrics.
    pub fn from_tables(
        namespace: &str,
        specs: &[DescriptorSpec],
        mappings: &[StatMapping],
    ) -> Result<Self, TableError> {
        let mut descriptors = Vec::with_capacity(specs.len());
        let mut by_name = HashMap::with_capacity(specs.len());
        let mut short_names = HashMap::with_capacity(specs.len());

        for (idx, spec) in specs.iter().enumerate() {
            let name = format!("{}_{}", namespace, spec.name);
            if by_name.insert(name.clone(), idx).is_some() {
                return Err(TableError::DuplicateMetric(name));
            }
            short_names.insert(spec.name, idx);
            descriptors.push(MetricDescriptor {
                name,
                help: spec.help.to_string(),
                kind: spec.kind,
                label_names: spec.labels.iter().map(|l| l.to_string()).collect(),
            });
        }

        let mut routes: HashMap<(StatsCommand, KeyFamily), HashMap<&'static str, Route>> =
            HashMap::new();
        let mut seen = HashSet::new();

        for mapping in mappings {
            let &descriptor =
                short_names
                    .get(mapping.metric)
                    .ok_or_else(|| TableError::UnknownMetric {
                        stat: mapping.stat.to_string(),
                        metric: mapping.metric.to_string(),
                    })?;

            let declared = &descriptors[descriptor].label_names;
            let key_labels = mapping.family.label_names();
            if mapping.label_count() != declared.len()
                || declared.iter().zip(key_labels).any(|(a, b)| a != b)
            {
                return Err(TableError::LabelMismatch {
                    stat: mapping.stat.to_string(),
                    metric: descriptors[descriptor].name.clone(),
                    got: mapping.label_count(),
                    want: declared.clone(),
                });
            }

            if !seen.insert((mapping.command, mapping.family, mapping.stat)) {
                return Err(TableError::DuplicateRoute {
                    command: mapping.command,
                    family: mapping.family,
                    stat: mapping.stat.to_string(),
                });
            }

            routes
                .entry((mapping.command, mapping.family))
                .or_default()
                .insert(
                    mapping.stat,
                    Route {
                        descriptor,
                        fixed_labels: mapping.fixed_labels,
                        conversion: mapping.conversion,
                    },
                );
        }

        let up = *short_names
            .get(descriptors::UP)
            .ok_or(TableError::MissingMeta(descriptors::UP))?;
        let scrape_duration = *short_names
            .get(descriptors::SCRAPE_DURATION)
            .ok_or(TableError::MissingMeta(descriptors::SCRAPE_DURATION))?;

        Ok(Self {
            descriptors,
            by_name,
            routes,
            up,
            scrape_duration,
        })
    }

    /// Every metric this mapper can produce, in table order.
    pub fn describe(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    /// Looks up a descriptor by its full name.
    pub fn descriptor(&self, name: &str) -> Option<&MetricDescriptor> {
        self.by_name.get(name).map(|&idx| &self.descriptors[idx])
    }

    pub fn up_descriptor(&self) -> &MetricDescriptor {
        &self.descriptors[self.up]
    }

    pub fn scrape_duration_descriptor(&self) -> &MetricDescriptor {
        &self.descriptors[self.scrape_duration]
    }

    /// Maps one parsed stat from the reply to `command`.
    ///
    /// Returns `Ok(None)` for stats the table does not know. A known stat
    /// whose value does not convert is a [`ParseError`] for that sample only.
    pub fn map(
        &self,
        command: StatsCommand,
        stat: &ParsedStat,
    ) -> Result<Option<MappedSample<'_>>, ParseError> {
        let Some(route) = self
            .routes
            .get(&(command, stat.family))
            .and_then(|by_stat| by_stat.get(stat.base_name.as_str()))
        else {
            return Ok(None);
        };

        let descriptor = &self.descriptors[route.descriptor];

        let mut label_values = stat.label_values.clone();
        label_values.extend(route.fixed_labels.iter().map(|l| l.to_string()));

        let value = match route.conversion {
            Conversion::Number => parse_number(&stat.value),
            Conversion::Flag => parse_flag(&stat.value),
            Conversion::Info => {
                label_values.push(stat.value.clone());
                Some(1.0)
            }
        }
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            ParseError::new(format!(
                "{}: cannot convert {:?} for {}",
                stat.base_name, stat.value, descriptor.name
            ))
        })?;

        if descriptor.kind == MetricKind::Counter && value < 0.0 {
            return Err(ParseError::new(format!(
                "{}: negative value {} for counter {}",
                stat.base_name, value, descriptor.name
            )));
        }

        Ok(Some(MappedSample {
            descriptor,
            sample: Sample {
                label_values,
                value,
            },
        }))
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok()
}

fn parse_flag(value: &str) -> Option<f64> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(1.0),
        "no" | "false" | "off" | "0" => Some(0.0),
        _ => None,
    }
}
