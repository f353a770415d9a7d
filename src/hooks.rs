use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::observability::MetricsCollector;
use crate::perf::MetricCollection;
use crate::pipeline::{ExecutionLog, StageKind, Target};
use crate::settings::RunSettings;
use crate::stages::StageConfig;

/// Points in a pipeline run where hooks are invoked, in this order:
/// `after_init` once per pipeline, then per stage `before_run`, command
/// execution and sanity, `after_run`, metric collection,
/// `before_performance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    AfterInit,
    BeforeRun,
    AfterRun,
    BeforePerformance,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AfterInit => "after_init",
            Self::BeforeRun => "before_run",
            Self::AfterRun => "after_run",
            Self::BeforePerformance => "before_performance",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    /// Skip the stage command and run `replacement` instead. Only honored
    /// at `before_run`.
    Skip { replacement: Vec<String> },
}

/// The stage a hook is invoked for.
pub struct StageView<'a> {
    pub name: &'a str,
    pub kind: StageKind,
    pub config: &'a StageConfig,
    pub workdir: &'a Path,
    /// Where exported results for this stage are written.
    pub output_dir: PathBuf,
    pub log: Option<&'a ExecutionLog>,
    pub metrics: &'a [MetricCollection],
    /// The stage directory was restored from the cache.
    pub cached: bool,
}

pub struct HookContext<'a> {
    pub point: HookPoint,
    pub target: &'a Target,
    pub settings: &'a RunSettings,
    pub collector: &'a MetricsCollector,
    /// `None` at `after_init`.
    pub stage: Option<StageView<'a>>,
}

pub type Hook = Arc<dyn Fn(&HookContext<'_>) -> Result<HookOutcome> + Send + Sync>;

#[derive(Clone)]
struct RegisteredHook {
    point: HookPoint,
    name: String,
    hook: Hook,
}

/// Named callbacks attached to hook points, run in registration order.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<RegisteredHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, point: HookPoint, name: impl Into<String>, hook: F)
    where
        F: Fn(&HookContext<'_>) -> Result<HookOutcome> + Send + Sync + 'static,
    {
        self.hooks.push(RegisteredHook {
            point,
            name: name.into(),
            hook: Arc::new(hook),
        });
    }

    pub fn at(&self, point: HookPoint) -> impl Iterator<Item = (&str, &Hook)> {
        self.hooks
            .iter()
            .filter(move |h| h.point == point)
            .map(|h| (h.name.as_str(), &h.hook))
    }

    pub fn names(&self, point: HookPoint) -> Vec<String> {
        self.at(point).map(|(name, _)| name.to_string()).collect()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| format!("{}:{}", h.point, h.name)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_are_listed_in_registration_order_per_point() {
        let mut hooks = HookRegistry::new();
        hooks.register(HookPoint::BeforeRun, "first", |_| Ok(HookOutcome::Continue));
        hooks.register(HookPoint::AfterRun, "other", |_| Ok(HookOutcome::Continue));
        hooks.register(HookPoint::BeforeRun, "second", |_| Ok(HookOutcome::Continue));

        assert_eq!(hooks.names(HookPoint::BeforeRun), vec!["first", "second"]);
        assert_eq!(hooks.names(HookPoint::AfterRun), vec!["other"]);
        assert!(hooks.names(HookPoint::AfterInit).is_empty());
    }
}
