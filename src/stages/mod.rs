pub mod shell;

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheSpec;
use crate::error::StageResult;
use crate::perf::{MetricGate, PerformanceSpec};
use crate::pipeline::{
    ExecutionLog, Invocation, Stage, StageDefinition, StageKind, StageRegistry, Target,
};
use crate::sanity::{SanityCheck, SanityGate};

use self::shell::{Script, run_script};

pub fn register_defaults(registry: &mut StageRegistry) {
    for kind in [StageKind::Download, StageKind::Build, StageKind::Run] {
        registry.register(kind.as_str(), move |definition| {
            Ok(Box::new(CommandStage::from_definition(kind, definition)?))
        });
    }
}

/// One-line summary of each built-in stage kind, for `list-stages`.
pub fn describe(kind: &str) -> Option<&'static str> {
    match StageKind::from_name(kind)? {
        StageKind::Download => Some("fetch sources, tarballs or input files"),
        StageKind::Build => Some("compile or install from the previous stage's output"),
        StageKind::Run => Some("execute the benchmark and extract performance values"),
    }
}

fn all_patterns() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

/// Typed parameters of a command stage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "all_patterns")]
    pub valid_platforms: Vec<String>,
    #[serde(default = "all_patterns")]
    pub valid_environments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerun_cmds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executable_opts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postrun_cmds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sanity: Vec<SanityCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performance: Vec<PerformanceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, VariantOverride>,
    /// Copy the previous stage's output into this stage's directory.
    #[serde(default = "default_true")]
    pub inherit_input: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            description: None,
            valid_platforms: all_patterns(),
            valid_environments: all_patterns(),
            modules: Vec::new(),
            variables: BTreeMap::new(),
            prerun_cmds: Vec::new(),
            executable: None,
            executable_opts: Vec::new(),
            postrun_cmds: Vec::new(),
            expected_artifacts: Vec::new(),
            sanity: Vec::new(),
            performance: Vec::new(),
            cache: None,
            variants: BTreeMap::new(),
            inherit_input: true,
        }
    }
}

/// Per-variant adjustments, e.g. compiler flags for one VM series.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VariantOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_opts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerun_cmds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postrun_cmds: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl StageConfig {
    pub fn from_params(params: crate::pipeline::StageParameters) -> Result<Self> {
        serde_json::from_value(Value::Object(params)).context("Invalid stage parameters")
    }

    /// Applies the override for `target`'s variant (or, failing that, its
    /// platform name) and substitutes build-time placeholders.
    pub fn resolve(&self, stage: &str, target: &Target) -> Self {
        let mut resolved = self.clone();
        let variant = target
            .variant
            .as_deref()
            .and_then(|v| self.variants.get(v))
            .or_else(|| self.variants.get(&target.platform));
        if let Some(over) = variant {
            if let Some(executable) = &over.executable {
                resolved.executable = Some(executable.clone());
            }
            if let Some(opts) = &over.executable_opts {
                resolved.executable_opts = opts.clone();
            }
            resolved.prerun_cmds.extend(over.prerun_cmds.iter().cloned());
            resolved
                .postrun_cmds
                .extend(over.postrun_cmds.iter().cloned());
            resolved.variables.extend(
                over.variables
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }

        let vars = Placeholders {
            stage,
            platform: &target.platform,
            environment: &target.environment,
            variant: target.reference_id(),
        };
        let sub = |s: &String| vars.apply(s);
        resolved.modules = resolved.modules.iter().map(sub).collect();
        resolved.prerun_cmds = resolved.prerun_cmds.iter().map(sub).collect();
        resolved.executable = resolved.executable.as_ref().map(sub);
        resolved.executable_opts = resolved.executable_opts.iter().map(sub).collect();
        resolved.postrun_cmds = resolved.postrun_cmds.iter().map(sub).collect();
        resolved.expected_artifacts = resolved.expected_artifacts.iter().map(sub).collect();
        resolved.variables = resolved
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), sub(v)))
            .collect();
        if let Some(cache) = resolved.cache.as_mut() {
            cache.on_hit_cmds = cache.on_hit_cmds.iter().map(sub).collect();
        }
        resolved
    }

    /// The command line built from `executable` and `executable_opts`.
    pub fn command_line(&self) -> Option<String> {
        let executable = self.executable.as_deref()?.trim();
        if executable.is_empty() {
            return None;
        }
        let mut line = executable.to_string();
        for opt in &self.executable_opts {
            line.push(' ');
            line.push_str(opt);
        }
        Some(line)
    }
}

struct Placeholders<'a> {
    stage: &'a str,
    platform: &'a str,
    environment: &'a str,
    variant: &'a str,
}

impl Placeholders<'_> {
    fn apply(&self, text: &str) -> String {
        text.replace("{stage}", self.stage)
            .replace("{platform}", self.platform)
            .replace("{environment}", self.environment)
            .replace("{variant}", self.variant)
    }
}

fn compile_globs(patterns: &[String], field: &str) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid {field} pattern '{p}'")))
        .collect()
}

/// A stage that renders its configuration into a shell script and runs it.
pub struct CommandStage {
    name: String,
    kind: StageKind,
    config: StageConfig,
    sanity: Vec<SanityGate>,
    metrics: Vec<MetricGate>,
    platforms: Vec<Pattern>,
    environments: Vec<Pattern>,
}

impl CommandStage {
    pub fn from_definition(kind: StageKind, definition: StageDefinition) -> Result<Self> {
        let StageDefinition {
            name,
            params,
            target,
        } = definition;
        if name.trim().is_empty() {
            return Err(anyhow!("{kind} stage requires a non-empty 'name'"));
        }
        let config = StageConfig::from_params(params)
            .with_context(|| format!("Stage '{name}'"))?
            .resolve(&name, &target);

        let sanity = config
            .sanity
            .iter()
            .map(SanityCheck::compile)
            .collect::<StageResult<Vec<_>>>()
            .with_context(|| format!("Stage '{name}': invalid sanity check"))?;
        let metrics = config
            .performance
            .iter()
            .map(PerformanceSpec::compile)
            .collect::<StageResult<Vec<_>>>()
            .with_context(|| format!("Stage '{name}': invalid performance spec"))?;
        let platforms = compile_globs(&config.valid_platforms, "valid_platforms")?;
        let environments = compile_globs(&config.valid_environments, "valid_environments")?;

        Ok(Self {
            name,
            kind,
            config,
            sanity,
            metrics,
            platforms,
            environments,
        })
    }

    /// Script lines in execution order: module loads, pre-run commands, then
    /// either the command and post-run commands or the replacement.
    pub fn script_lines(&self, replacement: Option<&[String]>) -> Vec<String> {
        let mut lines: Vec<String> = self
            .config
            .modules
            .iter()
            .map(|m| format!("module load {m}"))
            .collect();
        lines.extend(self.config.prerun_cmds.iter().cloned());
        match replacement {
            Some(commands) => lines.extend(commands.iter().cloned()),
            None => {
                lines.extend(self.config.command_line());
                lines.extend(self.config.postrun_cmds.iter().cloned());
            }
        }
        lines
    }
}

impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn sanity(&self) -> &[SanityGate] {
        &self.sanity
    }

    fn metrics(&self) -> &[MetricGate] {
        &self.metrics
    }

    fn supports(&self, target: &Target) -> bool {
        self.platforms.iter().any(|p| p.matches(&target.platform))
            && self
                .environments
                .iter()
                .any(|p| p.matches(&target.environment))
    }

    fn execute(&self, invocation: &Invocation<'_>) -> StageResult<ExecutionLog> {
        let workdir = invocation.workdir.display().to_string();
        let input = invocation
            .input
            .map(|artifact| artifact.path.display().to_string())
            .unwrap_or_else(|| workdir.clone());
        let expand = |line: String| line.replace("{input}", &input).replace("{workdir}", &workdir);

        let mut variables = invocation.target.metadata.variables.clone();
        variables.extend(self.config.variables.clone());
        let script = Script {
            lines: self
                .script_lines(invocation.replacement)
                .into_iter()
                .map(expand)
                .collect(),
            variables: variables
                .into_iter()
                .map(|(k, v)| (k, expand(v)))
                .collect(),
        };
        if script.is_empty() {
            return Ok(ExecutionLog::default());
        }
        run_script(
            &self.name,
            &invocation.settings.shell,
            &script,
            invocation.workdir,
        )
    }
}
