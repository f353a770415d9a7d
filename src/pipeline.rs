use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::cache::{ArtifactCache, copy_dir_contents, path_component, skip_if_cached};
use crate::error::{PipelineError, StageResult};
use crate::hooks::{HookContext, HookOutcome, HookPoint, HookRegistry, StageView};
use crate::observability::MetricsCollector;
use crate::perf::{MetricCollection, MetricGate, ResultRecord};
use crate::recipe::PlatformMetadata;
use crate::reference::{ReferenceTable, Verdict};
use crate::results::export_results;
use crate::sanity::SanityGate;
use crate::settings::RunSettings;
use crate::stages::StageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Download,
    Build,
    Run,
}

impl StageKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "download" => Some(Self::Download),
            "build" => Some(Self::Build),
            "run" => Some(Self::Run),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Build => "build",
            Self::Run => "run",
        }
    }

    /// Pipeline state while a stage of this kind executes.
    pub fn state(&self) -> PipelineState {
        match self {
            Self::Download => PipelineState::Downloading,
            Self::Build => PipelineState::Building,
            Self::Run => PipelineState::Running,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Downloading,
    Building,
    Running,
    Reported,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Reported | Self::Failed)
    }

    fn is_active(&self) -> bool {
        matches!(self, Self::Downloading | Self::Building | Self::Running)
    }

    /// Moves to `next`. Stage states follow the order of the stages in the
    /// pipeline, so any active state may follow pending or another active
    /// state; `reported` needs a stage to have run; nothing leaves a
    /// terminal state.
    pub fn transition(self, next: PipelineState) -> StageResult<PipelineState> {
        let allowed = match next {
            _ if self.is_terminal() => false,
            Self::Pending => false,
            Self::Failed => true,
            Self::Reported => self.is_active(),
            Self::Downloading | Self::Building | Self::Running => true,
        };
        if allowed {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Downloading => "DOWNLOADING",
            Self::Building => "BUILDING",
            Self::Running => "RUNNING",
            Self::Reported => "REPORTED",
            Self::Failed => "FAILED",
        })
    }
}

/// The system and programming environment one pipeline instance runs for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub platform: String,
    pub environment: String,
    pub variant: Option<String>,
    #[serde(skip)]
    pub metadata: PlatformMetadata,
}

impl Target {
    pub fn new(platform: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            environment: environment.into(),
            variant: None,
            metadata: PlatformMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: PlatformMetadata) -> Self {
        self.variant = metadata.variant.clone();
        self.metadata = metadata;
        self
    }

    /// Key of this target in the reference table: the variant when the
    /// platform declares one, otherwise the platform name.
    pub fn reference_id(&self) -> &str {
        self.variant.as_deref().unwrap_or(&self.platform)
    }
}

/// Output directory of a stage. Owned by the stage that produced it; the
/// next stage only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub stage: String,
    pub path: PathBuf,
    /// Contents were restored from the persistent cache.
    pub cached: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionLog {
    pub stdout: String,
    pub stderr: String,
    /// Recorded for the report only. `None` when killed by a signal.
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
}

pub struct Invocation<'a> {
    pub workdir: &'a Path,
    pub input: Option<&'a Artifact>,
    /// Commands to run in place of the stage command.
    pub replacement: Option<&'a [String]>,
    pub target: &'a Target,
    pub settings: &'a RunSettings,
}

pub type StageParameters = Map<String, Value>;

pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> StageKind;
    fn config(&self) -> &StageConfig;
    fn sanity(&self) -> &[SanityGate];
    fn metrics(&self) -> &[MetricGate];
    fn supports(&self, target: &Target) -> bool;
    fn execute(&self, invocation: &Invocation<'_>) -> StageResult<ExecutionLog>;
}

/// Everything a stage constructor receives.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub name: String,
    pub params: StageParameters,
    pub target: Target,
}

type StageConstructor = Arc<dyn Fn(StageDefinition) -> Result<Box<dyn Stage>> + Send + Sync>;

pub struct StageRegistry {
    factories: HashMap<String, StageConstructor>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(StageDefinition) -> Result<Box<dyn Stage>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(constructor));
    }

    pub fn create(&self, kind: &str, definition: StageDefinition) -> Result<Box<dyn Stage>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            anyhow!(
                "Unknown stage '{}'. Available stages: {}",
                kind,
                self.known_stages().join(", ")
            )
        })?;
        factory(definition)
    }

    pub fn known_stages(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageSpec {
    pub stage: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<StageParameters>,
}

/// What `run_stage` hands back: the stage's output directory and its log.
#[derive(Debug, Clone)]
pub struct StageRun {
    pub artifact: Artifact,
    pub log: ExecutionLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Cached,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub name: String,
    pub kind: StageKind,
    pub status: StageStatus,
    pub workdir: PathBuf,
    pub output_dir: PathBuf,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<ResultRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub pipeline: String,
    pub target: Target,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineReport {
    pub fn is_reported(&self) -> bool {
        self.state == PipelineState::Reported
    }

    pub fn records(&self) -> impl Iterator<Item = &ResultRecord> {
        self.stages.iter().flat_map(|stage| stage.records.iter())
    }

    pub fn performance_failures(&self) -> Vec<&ResultRecord> {
        self.records()
            .filter(|record| record.verdict == Verdict::Fail)
            .collect()
    }
}

pub struct PipelineExecutor {
    name: String,
    target: Target,
    settings: RunSettings,
    stages: Vec<Box<dyn Stage>>,
    hooks: HookRegistry,
    references: ReferenceTable,
    cache: ArtifactCache,
    metrics: MetricsCollector,
}

impl PipelineExecutor {
    pub fn new(
        name: impl Into<String>,
        stages: Vec<Box<dyn Stage>>,
        target: Target,
        settings: RunSettings,
        references: ReferenceTable,
    ) -> Self {
        let cache = ArtifactCache::new(settings.cache_root.clone());
        Self {
            name: name.into(),
            target,
            settings,
            stages,
            hooks: HookRegistry::new(),
            references,
            cache,
            metrics: MetricsCollector::new(),
        }
    }

    /// Records into `metrics` instead of a collector of its own.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn register_hook<F>(&mut self, point: HookPoint, name: impl Into<String>, hook: F)
    where
        F: Fn(&HookContext<'_>) -> Result<HookOutcome> + Send + Sync + 'static,
    {
        self.hooks.register(point, name, hook);
    }

    /// Names of stages that are not valid for this pipeline's target.
    pub fn unsupported_stages(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|stage| !stage.supports(&self.target))
            .map(|stage| stage.name().to_string())
            .collect()
    }

    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.scoped_dir(&self.settings.stage_root, stage)
    }

    pub fn output_dir(&self, stage: &str) -> PathBuf {
        self.scoped_dir(&self.settings.output_root, stage)
    }

    fn scoped_dir(&self, root: &Path, stage: &str) -> PathBuf {
        root.join(path_component(&self.target.platform))
            .join(path_component(&self.target.environment))
            .join(path_component(stage))
    }

    /// Runs every stage in order, stopping at the first failure.
    #[instrument(skip(self), fields(pipeline = %self.name, platform = %self.target.platform))]
    pub fn execute(&self) -> PipelineReport {
        let started_at = Utc::now();
        let total_start = Instant::now();
        let mut state = PipelineState::Pending;
        let mut outcomes = Vec::with_capacity(self.stages.len());
        let mut error = None;

        if let Err(err) = self.run_hooks(HookPoint::AfterInit, None) {
            error = Some(err.to_string());
            state = PipelineState::Failed;
        }

        let mut input: Option<Artifact> = None;
        for stage in &self.stages {
            if state.is_terminal() {
                break;
            }
            state = match state.transition(stage.kind().state()) {
                Ok(next) => next,
                Err(err) => {
                    error = Some(err.to_string());
                    PipelineState::Failed
                }
            };
            if state.is_terminal() {
                break;
            }
            debug!(stage = stage.name(), %state, "Entering stage");

            let (outcome, artifact) = self.process_stage(stage.as_ref(), input.as_ref());
            let failed = outcome.status == StageStatus::Failed;
            if failed {
                error = outcome.error.clone();
            }
            outcomes.push(outcome);
            if failed {
                state = PipelineState::Failed;
                break;
            }
            input = artifact;
        }

        if !state.is_terminal() {
            state = match state.transition(PipelineState::Reported) {
                Ok(next) => next,
                Err(err) => {
                    error = Some(err.to_string());
                    PipelineState::Failed
                }
            };
        }

        self.metrics.record_total_duration(total_start.elapsed());
        match state {
            PipelineState::Reported => info!(%state, stages = outcomes.len(), "Pipeline finished"),
            _ => warn!(%state, error = error.as_deref().unwrap_or(""), "Pipeline failed"),
        }

        PipelineReport {
            pipeline: self.name.clone(),
            target: self.target.clone(),
            state,
            started_at,
            finished_at: Utc::now(),
            stages: outcomes,
            error,
        }
    }

    fn process_stage(
        &self,
        stage: &dyn Stage,
        input: Option<&Artifact>,
    ) -> (StageOutcome, Option<Artifact>) {
        let span = tracing::span!(
            tracing::Level::INFO,
            "stage",
            stage = stage.name(),
            kind = %stage.kind()
        );
        let _span_guard = span.enter();
        let _timer = self.metrics.start_stage(stage.name());
        let started = Instant::now();

        let mut outcome = StageOutcome {
            name: stage.name().to_string(),
            kind: stage.kind(),
            status: StageStatus::Failed,
            workdir: self.stage_dir(stage.name()),
            output_dir: self.output_dir(stage.name()),
            duration_ms: 0.0,
            exit_code: None,
            records: Vec::new(),
            error_kind: None,
            error: None,
        };

        let result = self
            .run_stage(stage, input)
            .and_then(|run| self.finish_stage(stage, run));

        outcome.duration_ms = started.elapsed().as_secs_f64() * 1_000.0;
        match result {
            Ok((run, records)) => {
                outcome.status = if run.artifact.cached {
                    StageStatus::Cached
                } else {
                    StageStatus::Passed
                };
                outcome.exit_code = run.log.exit_code;
                outcome.records = records;
                info!(
                    status = ?outcome.status,
                    duration_ms = outcome.duration_ms,
                    "Stage passed"
                );
                (outcome, Some(run.artifact))
            }
            Err(err) => {
                warn!(error = %err, "Stage failed");
                if matches!(
                    err,
                    PipelineError::SanityMismatch { .. }
                        | PipelineError::PatternNotFound { .. }
                        | PipelineError::ArtifactMissing { .. }
                ) {
                    self.metrics.record_sanity_failure();
                }
                outcome.error_kind = Some(err.kind().to_string());
                outcome.error = Some(err.to_string());
                (outcome, None)
            }
        }
    }

    /// Executes `stage` against `input` in a fresh working directory and
    /// checks its expected artifacts.
    pub fn run_stage(&self, stage: &dyn Stage, input: Option<&Artifact>) -> StageResult<StageRun> {
        let workdir = self.stage_dir(stage.name());
        prepare_workdir(&workdir)?;

        if stage.config().inherit_input
            && let Some(input) = input
        {
            copy_dir_contents(&input.path, &workdir)?;
        }

        let mut replacement: Option<Vec<String>> = None;
        for (hook_name, hook) in self.hooks.at(HookPoint::BeforeRun) {
            let ctx = self.stage_context(HookPoint::BeforeRun, stage, &workdir, None, &[], false);
            let outcome = hook(&ctx).map_err(|err| PipelineError::Hook {
                stage: stage.name().to_string(),
                hook: hook_name.to_string(),
                message: format!("{err:#}"),
            })?;
            if let HookOutcome::Skip { replacement: commands } = outcome
                && replacement.is_none()
            {
                debug!(hook = hook_name, "Stage command short-circuited");
                replacement = Some(commands);
            }
        }

        let log = stage.execute(&Invocation {
            workdir: &workdir,
            input,
            replacement: replacement.as_deref(),
            target: &self.target,
            settings: &self.settings,
        })?;

        match log.exit_code {
            Some(0) => {}
            Some(code) => warn!(exit_code = code, "Stage command exited non-zero"),
            None => warn!("Stage command terminated by signal"),
        }

        for expected in &stage.config().expected_artifacts {
            let path = workdir.join(expected);
            if !path.exists() {
                return Err(PipelineError::ArtifactMissing {
                    stage: stage.name().to_string(),
                    path,
                });
            }
        }

        Ok(StageRun {
            artifact: Artifact {
                stage: stage.name().to_string(),
                path: workdir,
                cached: replacement.is_some(),
            },
            log,
        })
    }

    fn finish_stage(
        &self,
        stage: &dyn Stage,
        run: StageRun,
    ) -> StageResult<(StageRun, Vec<ResultRecord>)> {
        let workdir = run.artifact.path.clone();
        for gate in stage.sanity() {
            gate.evaluate(stage.name(), &workdir, &run.log)?;
        }
        self.metrics.record_sanity_pass();

        self.run_stage_hooks(HookPoint::AfterRun, stage, &run, &[])?;

        let mut collections: Vec<MetricCollection> = Vec::with_capacity(stage.metrics().len());
        for gate in stage.metrics() {
            collections.push(gate.collect(
                stage.name(),
                &workdir,
                &run.log,
                &self.references,
                self.target.reference_id(),
                &self.target.platform,
            )?);
        }

        self.run_stage_hooks(HookPoint::BeforePerformance, stage, &run, &collections)?;

        let records: Vec<ResultRecord> = collections
            .into_iter()
            .flat_map(|collection| collection.records)
            .collect();
        for record in &records {
            self.metrics.record_verdict(record.verdict);
            info!(
                node = record.node.as_str(),
                metric = record.metric.as_str(),
                value = record.value,
                unit = record.unit.as_str(),
                verdict = ?record.verdict,
                "Performance value"
            );
        }
        Ok((run, records))
    }

    fn run_stage_hooks(
        &self,
        point: HookPoint,
        stage: &dyn Stage,
        run: &StageRun,
        collections: &[MetricCollection],
    ) -> StageResult<()> {
        for (hook_name, hook) in self.hooks.at(point) {
            let ctx = self.stage_context(
                point,
                stage,
                &run.artifact.path,
                Some(&run.log),
                collections,
                run.artifact.cached,
            );
            hook(&ctx).map_err(|err| PipelineError::Hook {
                stage: stage.name().to_string(),
                hook: hook_name.to_string(),
                message: format!("{err:#}"),
            })?;
        }
        Ok(())
    }

    fn run_hooks(&self, point: HookPoint, stage: Option<StageView<'_>>) -> StageResult<()> {
        let ctx = HookContext {
            point,
            target: &self.target,
            settings: &self.settings,
            collector: &self.metrics,
            stage,
        };
        for (hook_name, hook) in self.hooks.at(point) {
            hook(&ctx).map_err(|err| PipelineError::Hook {
                stage: self.name.clone(),
                hook: hook_name.to_string(),
                message: format!("{err:#}"),
            })?;
        }
        Ok(())
    }

    fn stage_context<'a>(
        &'a self,
        point: HookPoint,
        stage: &'a dyn Stage,
        workdir: &'a Path,
        log: Option<&'a ExecutionLog>,
        metrics: &'a [MetricCollection],
        cached: bool,
    ) -> HookContext<'a> {
        HookContext {
            point,
            target: &self.target,
            settings: &self.settings,
            collector: &self.metrics,
            stage: Some(StageView {
                name: stage.name(),
                kind: stage.kind(),
                config: stage.config(),
                workdir,
                output_dir: self.output_dir(stage.name()),
                log,
                metrics,
                cached,
            }),
        }
    }
}

fn prepare_workdir(workdir: &Path) -> StageResult<()> {
    if workdir.exists() {
        fs::remove_dir_all(workdir).map_err(|err| {
            PipelineError::io(format!("clearing stage directory {}", workdir.display()), err)
        })?;
    }
    fs::create_dir_all(workdir).map_err(|err| {
        PipelineError::io(format!("creating stage directory {}", workdir.display()), err)
    })
}

/// Creates every stage of `stage_specs` for `target` and wires the built-in
/// hooks: cache restore before each run, cache publish after a passing run
/// and results export before performance reporting.
pub fn build_pipeline(
    stage_registry: &StageRegistry,
    name: &str,
    stage_specs: &[StageSpec],
    target: Target,
    settings: RunSettings,
) -> Result<PipelineExecutor> {
    if stage_specs.is_empty() {
        bail!("Pipeline '{name}' has no stages");
    }

    let mut seen = BTreeSet::new();
    let mut dirs = BTreeMap::new();
    let mut stages = Vec::with_capacity(stage_specs.len());
    for spec in stage_specs {
        if !seen.insert(spec.name.as_str()) {
            bail!("Duplicate stage name '{}' in pipeline '{name}'", spec.name);
        }
        if let Some(other) = dirs.insert(path_component(&spec.name), spec.name.as_str()) {
            bail!(
                "Stages '{other}' and '{}' would share a working directory in pipeline '{name}'",
                spec.name
            );
        }
        let definition = StageDefinition {
            name: spec.name.clone(),
            params: spec.params.clone().unwrap_or_default(),
            target: target.clone(),
        };
        let stage = stage_registry.create(&spec.stage, definition)?;
        stages.push(stage);
    }

    let reference_keys: Vec<String> = stages
        .iter()
        .flat_map(|stage| stage.metrics().iter())
        .map(|gate| gate.spec().reference_key().to_string())
        .collect();
    let references = ReferenceTable::for_platform(
        target.reference_id(),
        &target.metadata,
        reference_keys.iter().map(String::as_str),
    )?;
    if !target.metadata.references.is_empty() || !target.metadata.nhc_values.is_empty() {
        debug!(
            reference_id = target.reference_id(),
            known = references.contains_platform(target.reference_id()),
            "Reference table built"
        );
    }

    let mut executor = PipelineExecutor::new(name, stages, target, settings, references);
    register_builtin_hooks(&mut executor);
    Ok(executor)
}

fn register_builtin_hooks(executor: &mut PipelineExecutor) {
    let cache = executor.cache.clone();
    executor.register_hook(HookPoint::BeforeRun, "restore-cache", move |ctx| {
        let Some(stage) = &ctx.stage else {
            return Ok(HookOutcome::Continue);
        };
        let Some(spec) = &stage.config.cache else {
            return Ok(HookOutcome::Continue);
        };
        let marker = cache.marker_path(
            &ctx.target.platform,
            &ctx.target.environment,
            stage.name,
            spec,
        );
        if !skip_if_cached(&marker) {
            debug!(marker = %marker.display(), "Cache miss");
            return Ok(HookOutcome::Continue);
        }
        let entry = cache.entry_dir(&ctx.target.platform, &ctx.target.environment, stage.name);
        cache.restore(&entry, stage.workdir)?;
        ctx.collector.record_cache_hit();
        info!(entry = %entry.display(), "Reusing cached artifact");
        Ok(HookOutcome::Skip {
            replacement: spec.on_hit_cmds.clone(),
        })
    });

    let cache = executor.cache.clone();
    executor.register_hook(HookPoint::AfterRun, "publish-cache", move |ctx| {
        if let Some(stage) = &ctx.stage
            && stage.config.cache.is_some()
            && !stage.cached
        {
            let entry =
                cache.entry_dir(&ctx.target.platform, &ctx.target.environment, stage.name);
            cache.publish(stage.workdir, &entry)?;
            info!(entry = %entry.display(), "Artifact cached");
        }
        Ok(HookOutcome::Continue)
    });

    executor.register_hook(HookPoint::BeforePerformance, "export-results", |ctx| {
        let Some(stage) = &ctx.stage else {
            return Ok(HookOutcome::Continue);
        };
        for collection in stage.metrics {
            if let Some(file_name) = &collection.spec.export {
                let path = stage.output_dir.join(file_name);
                export_results(&path, &collection.samples)?;
                info!(
                    metric = collection.spec.metric.as_str(),
                    results = %path.display(),
                    "Results exported"
                );
            }
        }
        Ok(HookOutcome::Continue)
    });
}
