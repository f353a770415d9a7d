use std::collections::BTreeMap;
use std::path::Path;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, StageResult};
use crate::pipeline::ExecutionLog;
use crate::reference::{ReferenceEntry, ReferenceTable, Verdict};
use crate::sanity::{LogSource, compile_pattern, count_hosts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// One value per node, captured together with the node id.
    #[default]
    PerNode,
    /// A single bracketed list of samples (`"series" : [a, b, c]`) reduced
    /// to its mean.
    SeriesAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSpec {
    pub metric: String,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub source: LogSource,
    #[serde(default)]
    pub mode: ExtractMode,
    /// Key looked up in platform metadata; defaults to `metric`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_key: Option<String>,
    /// Host list whose line count must equal the number of records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_file: Option<String>,
    /// File name of the `{node: value}` JSON written to the output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<String>,
    /// Node id recorded for `series_average` values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_label: Option<String>,
}

impl PerformanceSpec {
    pub fn reference_key(&self) -> &str {
        self.reference_key.as_deref().unwrap_or(&self.metric)
    }

    pub fn effective_pattern(&self) -> String {
        match (&self.pattern, self.mode) {
            (Some(pattern), _) => pattern.clone(),
            (None, ExtractMode::PerNode) => default_node_pattern(&self.metric),
            (None, ExtractMode::SeriesAverage) => r#""series" : \[(?P<value>.+)\]"#.to_string(),
        }
    }

    pub fn compile(&self) -> StageResult<MetricGate> {
        Ok(MetricGate {
            spec: self.clone(),
            pattern: compile_pattern(&self.effective_pattern())?,
        })
    }
}

/// The results-log line pattern: `system: <node> <metric>: <value>`.
pub fn default_node_pattern(metric: &str) -> String {
    format!(
        r"system: (?P<node>\S+) {}: (?P<value>\S+)",
        regex::escape(metric)
    )
}

pub fn format_result_line(node: &str, metric: &str, value: &str) -> String {
    format!("system: {node} {metric}: {value}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub stage: String,
    pub node: String,
    pub metric: String,
    pub value: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceEntry>,
    pub verdict: Verdict,
}

/// One `(node, raw value)` capture in log order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawSample {
    pub node: String,
    pub value: String,
}

fn group<'t>(caps: &Captures<'t>, name: &str, index: usize) -> Option<&'t str> {
    caps.name(name)
        .or_else(|| caps.get(index))
        .map(|m| m.as_str())
}

/// Every `(node, value)` capture of `pattern` in `raw_log_text`, in order.
/// Uses the `node`/`value` named groups, falling back to groups 1 and 2.
pub fn extract_samples(raw_log_text: &str, pattern: &Regex) -> Vec<RawSample> {
    pattern
        .captures_iter(raw_log_text)
        .filter_map(|caps| {
            let node = group(&caps, "node", 1)?;
            let value = group(&caps, "value", 2)?;
            Some(RawSample {
                node: node.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

/// Maps node id to metric value. Lines that do not match and values that
/// are not floats are skipped; a node seen twice keeps its last value.
pub fn extract_metrics(raw_log_text: &str, pattern: &Regex) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    for sample in extract_samples(raw_log_text, pattern) {
        match sample.value.parse::<f64>() {
            Ok(value) => {
                metrics.insert(sample.node, value);
            }
            Err(_) => {
                debug!(
                    node = sample.node.as_str(),
                    value = sample.value.as_str(),
                    "Skipping unparsable metric value"
                );
            }
        }
    }
    metrics
}

/// Mean of the first bracketed sample list captured by `pattern`.
pub fn series_average(raw_log_text: &str, pattern: &Regex) -> Option<f64> {
    let caps = pattern.captures(raw_log_text)?;
    let series = group(&caps, "value", 1)?;
    let samples: Vec<f64> = series
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .ok()?;
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Records gathered for one metric of one stage.
#[derive(Debug, Clone)]
pub struct MetricCollection {
    pub spec: PerformanceSpec,
    pub records: Vec<ResultRecord>,
    pub samples: Vec<RawSample>,
}

#[derive(Debug, Clone)]
pub struct MetricGate {
    spec: PerformanceSpec,
    pattern: Regex,
}

impl MetricGate {
    pub fn spec(&self) -> &PerformanceSpec {
        &self.spec
    }

    pub fn collect(
        &self,
        stage: &str,
        workdir: &Path,
        log: &ExecutionLog,
        references: &ReferenceTable,
        reference_id: &str,
        default_node: &str,
    ) -> StageResult<MetricCollection> {
        let text = self.spec.source.read(stage, workdir, log)?;
        let reference = references.lookup(reference_id, self.spec.reference_key());

        let (values, samples) = match self.spec.mode {
            ExtractMode::PerNode => (
                extract_metrics(&text, &self.pattern),
                extract_samples(&text, &self.pattern),
            ),
            ExtractMode::SeriesAverage => {
                let node = self
                    .spec
                    .node_label
                    .clone()
                    .unwrap_or_else(|| default_node.to_string());
                match series_average(&text, &self.pattern) {
                    Some(avg) => (
                        BTreeMap::from([(node.clone(), avg)]),
                        vec![RawSample {
                            node,
                            value: avg.to_string(),
                        }],
                    ),
                    None => (BTreeMap::new(), Vec::new()),
                }
            }
        };

        let records: Vec<ResultRecord> = values
            .into_iter()
            .map(|(node, value)| ResultRecord {
                stage: stage.to_string(),
                node,
                metric: self.spec.metric.clone(),
                value,
                unit: self.spec.unit.clone(),
                reference: reference.cloned(),
                verdict: reference
                    .map(|r| r.evaluate(value))
                    .unwrap_or(Verdict::Unchecked),
            })
            .collect();

        if let Some(hosts_file) = &self.spec.hosts_file {
            let path = workdir.join(hosts_file);
            if !path.is_file() {
                return Err(PipelineError::ArtifactMissing {
                    stage: stage.to_string(),
                    path,
                });
            }
            let nodes = count_hosts(&path)?;
            if nodes != records.len() {
                return Err(PipelineError::SanityMismatch {
                    stage: stage.to_string(),
                    pattern: self.pattern.as_str().to_string(),
                    expected: nodes,
                    found: records.len(),
                });
            }
        }

        Ok(MetricCollection {
            spec: self.spec.clone(),
            records,
            samples,
        })
    }
}
