use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, StageResult};
use crate::recipe::PlatformMetadata;

/// Expected value of a metric plus a tolerance band.
///
/// `lower` and `upper` are relative thresholds: a reference of 100 with
/// `lower: -0.1` accepts anything from 90 upwards. `None` leaves that side
/// unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// No reference exists for the platform, so the value was only reported.
    Unchecked,
}

impl ReferenceEntry {
    pub fn validate(&self, metric: &str) -> StageResult<()> {
        let invalid = |reason: String| PipelineError::InvalidReference {
            metric: metric.to_string(),
            reason,
        };
        if !self.value.is_finite() {
            return Err(invalid(format!("reference value {} is not finite", self.value)));
        }
        if let Some(lower) = self.lower
            && !(-1.0..=0.0).contains(&lower)
        {
            return Err(invalid(format!(
                "lower threshold {lower} must be within [-1, 0]"
            )));
        }
        if let Some(upper) = self.upper
            && upper < 0.0
        {
            return Err(invalid(format!("upper threshold {upper} must be >= 0")));
        }
        Ok(())
    }

    /// Absolute acceptance bounds derived from the relative thresholds.
    pub fn bounds(&self) -> (Option<f64>, Option<f64>) {
        let bound = |threshold: Option<f64>| {
            threshold.map(|t| {
                let t = if self.value < 0.0 { -t } else { t };
                self.value * (1.0 + t)
            })
        };
        (bound(self.lower), bound(self.upper))
    }

    pub fn evaluate(&self, measured: f64) -> Verdict {
        let (lower, upper) = self.bounds();
        let (lower, upper) = match (lower, upper) {
            (Some(l), Some(u)) if l > u => (Some(u), Some(l)),
            other => other,
        };
        let above_lower = lower.is_none_or(|l| measured >= l);
        let below_upper = upper.is_none_or(|u| measured <= u);
        if above_lower && below_upper {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

/// Looks up the reference for `metric_name` in a platform's metadata.
///
/// An explicit `references` entry wins. Otherwise the node health check
/// layout is used: `nhc_values.<metric>` is the nominal value and
/// `nhc_values.<metric>_limits` a `[lower, upper]` pair. Returns `None`
/// when neither is present; there is no fallback.
pub fn build_reference(
    platform_metadata: &PlatformMetadata,
    metric_name: &str,
) -> Option<ReferenceEntry> {
    if let Some(entry) = platform_metadata.references.get(metric_name) {
        return Some(entry.clone());
    }

    let value = platform_metadata.nhc_values.get(metric_name)?.as_scalar()?;
    let limits = platform_metadata
        .nhc_values
        .get(&format!("{metric_name}_limits"))
        .and_then(NhcValue::as_limits)
        .unwrap_or((None, None));
    Some(ReferenceEntry {
        value,
        lower: limits.0,
        upper: limits.1,
        unit: None,
    })
}

/// Raw value stored under `nhc_values` in platform metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NhcValue {
    Scalar(f64),
    Limits(Vec<Option<f64>>),
}

impl NhcValue {
    fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Limits(_) => None,
        }
    }

    fn as_limits(&self) -> Option<(Option<f64>, Option<f64>)> {
        match self {
            Self::Limits(values) if values.len() == 2 => Some((values[0], values[1])),
            _ => None,
        }
    }
}

/// Reference entries keyed by platform (or variant) id, then metric name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceTable {
    entries: BTreeMap<String, BTreeMap<String, ReferenceEntry>>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table for one platform. Metrics without a reference are
    /// left out, so the platform may end up with no entries at all.
    pub fn for_platform<'a>(
        platform_id: &str,
        metadata: &PlatformMetadata,
        metrics: impl IntoIterator<Item = &'a str>,
    ) -> StageResult<Self> {
        let mut table = Self::new();
        for metric in metrics {
            if let Some(entry) = build_reference(metadata, metric) {
                entry.validate(metric)?;
                table.insert(platform_id, metric, entry);
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, platform_id: &str, metric: &str, entry: ReferenceEntry) {
        self.entries
            .entry(platform_id.to_string())
            .or_default()
            .insert(metric.to_string(), entry);
    }

    pub fn lookup(&self, platform_id: &str, metric: &str) -> Option<&ReferenceEntry> {
        self.entries.get(platform_id)?.get(metric)
    }

    pub fn contains_platform(&self, platform_id: &str) -> bool {
        self.entries.contains_key(platform_id)
    }
}
