use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use benchstage::lockfile::generate_lock;
use benchstage::observability::{MetricsCollector, log_snapshot};
use benchstage::pipeline::{PipelineReport, StageRegistry, build_pipeline};
use benchstage::presets::{PRESETS, generate_preset};
use benchstage::recipe::Recipe;
use benchstage::reference::Verdict;
use benchstage::settings::{RunSettings, SettingsOverrides};
use benchstage::stages;
use benchstage::validation::validate_recipe;
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Some(Commands::Run(args)) => run_recipe(args),
        Some(Commands::ListStages) => {
            list_stages();
            Ok(())
        }
        Some(Commands::Validate { recipe }) => validate_recipe_cmd(recipe),
        Some(Commands::Lock { recipe, output }) => lock_recipe(recipe, output),
        Some(Commands::Recipe { action }) => recipe_command(action),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn run_recipe(args: RunArgs) -> Result<()> {
    let recipe = Recipe::load(&args.recipe)?;
    let registry = build_registry();

    let report = validate_recipe(&recipe, &registry);
    for warning in &report.warnings {
        warn!(file = %args.recipe.display(), "{warning}");
    }
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(file = %args.recipe.display(), "{error_msg}");
        }
        bail!(
            "Recipe validation failed with {} error(s)",
            report.errors.len()
        );
    }

    let settings = RunSettings::resolve(
        &recipe.settings,
        &recipe.base_dir(),
        SettingsOverrides {
            stage_root: args.stage_root,
            output_root: args.output_root,
            cache_root: args.cache_root,
            shell: args.shell,
        },
    );

    let platforms = if args.platforms.is_empty() {
        recipe.platform_names()
    } else {
        args.platforms.clone()
    };

    let metrics = MetricsCollector::global();
    let mut reports: Vec<PipelineReport> = Vec::new();
    for platform in &platforms {
        let target = recipe.target(platform, args.environment.as_deref())?;
        let executor = build_pipeline(
            &registry,
            &recipe.name,
            &recipe.pipeline,
            target,
            settings.clone(),
        )
        .with_context(|| format!("Failed to build pipeline for platform '{platform}'"))?
        .with_metrics(metrics.clone());

        let unsupported = executor.unsupported_stages();
        if !unsupported.is_empty() {
            warn!(
                platform = platform.as_str(),
                stages = %unsupported.join(", "),
                "Pipeline not valid for platform; skipping"
            );
            continue;
        }

        if args.dry_run {
            info!(
                platform = platform.as_str(),
                environment = executor.target().environment.as_str(),
                "Dry run: {} stage(s)",
                executor.stages().len()
            );
            for stage in executor.stages() {
                println!(
                    "{platform}\t{}\t{}\t{}",
                    stage.kind(),
                    stage.name(),
                    executor.stage_dir(stage.name()).display()
                );
            }
            continue;
        }

        let report = executor.execute();
        print_report(&report);
        reports.push(report);
    }

    if let Some(path) = &args.report {
        create_parent(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        to_writer_pretty(file, &reports)
            .with_context(|| format!("Failed to write report JSON: {}", path.display()))?;
        info!(report = %path.display(), "Pipeline report written");
    }

    if args.print_metrics || args.metrics_json.is_some() || args.metrics_prometheus.is_some() {
        let snapshot = metrics.snapshot();
        if args.print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = &args.metrics_json {
            create_parent(path)?;
            let file = File::create(path)
                .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
            to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
        if let Some(path) = &args.metrics_prometheus {
            create_parent(path)?;
            std::fs::write(path, snapshot.to_prometheus()).with_context(|| {
                format!("Failed to write Prometheus metrics: {}", path.display())
            })?;
            info!(metrics = %path.display(), "Prometheus metrics written");
        }
    }

    let failed: Vec<_> = reports
        .iter()
        .filter(|report| !report.is_reported())
        .map(|report| report.target.platform.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("Pipeline failed on platform(s): {}", failed.join(", "));
    }

    let performance_failures: usize = reports
        .iter()
        .map(|report| report.performance_failures().len())
        .sum();
    if performance_failures > 0 {
        if args.allow_performance_failures {
            warn!(
                count = performance_failures,
                "Performance values outside their reference band"
            );
        } else {
            bail!("{performance_failures} performance value(s) outside their reference band");
        }
    }

    Ok(())
}

fn print_report(report: &PipelineReport) {
    let platform = report.target.platform.as_str();
    for stage in &report.stages {
        println!(
            "[{}] {platform} {} ({}) {:.1} ms",
            format!("{:?}", stage.status).to_uppercase(),
            stage.name,
            stage.kind,
            stage.duration_ms
        );
        if let Some(err) = &stage.error {
            println!("    {err}");
        }
        for record in &stage.records {
            let verdict = match record.verdict {
                Verdict::Pass => "pass",
                Verdict::Fail => "FAIL",
                Verdict::Unchecked => "unchecked",
            };
            let band = record
                .reference
                .as_ref()
                .map(|r| {
                    let (lower, upper) = r.bounds();
                    let fmt = |b: Option<f64>| b.map_or_else(|| "-".to_string(), |v| format!("{v}"));
                    format!(" ref={} [{}, {}]", r.value, fmt(lower), fmt(upper))
                })
                .unwrap_or_default();
            println!(
                "    {} {}: {} {}{band} {verdict}",
                record.node, record.metric, record.value, record.unit
            );
        }
    }
    println!("{platform}: {}", report.state);
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn list_stages() {
    let registry = build_registry();
    println!("Available stages:");
    for name in registry.known_stages() {
        match stages::describe(&name) {
            Some(description) => println!("- {name}: {description}"),
            None => println!("- {name}"),
        }
    }
}

fn validate_recipe_cmd(recipe_path: PathBuf) -> Result<()> {
    let recipe = Recipe::load(&recipe_path)?;
    let registry = build_registry();
    let report = validate_recipe(&recipe, &registry);

    for warning in &report.warnings {
        warn!(file = %recipe_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %recipe_path.display(), "Recipe validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %recipe_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Recipe validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn lock_recipe(recipe_path: PathBuf, output_path: PathBuf) -> Result<()> {
    let recipe = Recipe::load(&recipe_path)?;
    let registry = build_registry();
    let report = validate_recipe(&recipe, &registry);

    for warning in &report.warnings {
        warn!(file = %recipe_path.display(), "{warning}");
    }

    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(file = %recipe_path.display(), "{error_msg}");
        }
        return Err(anyhow!(
            "Cannot generate lockfile due to {} validation error(s)",
            report.errors.len()
        ));
    }

    generate_lock(&recipe, &output_path)?;
    info!(
        lockfile = %output_path.display(),
        "Lockfile generated successfully"
    );

    Ok(())
}

fn recipe_command(command: RecipeCommands) -> Result<()> {
    match command {
        RecipeCommands::New { preset, output } => {
            let destination =
                output.unwrap_or_else(|| PathBuf::from(format!("recipes/{preset}.yaml")));
            let generated = generate_preset(&preset, &destination)?;
            info!(
                preset = %preset,
                path = %generated.display(),
                "Preset recipe generated"
            );
            Ok(())
        }
        RecipeCommands::Lint { recipes } => lint_recipes(&recipes),
        RecipeCommands::Presets => {
            for name in PRESETS {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn lint_recipes(recipes: &[PathBuf]) -> Result<()> {
    if recipes.is_empty() {
        bail!("No recipe files supplied for linting");
    }

    let registry = build_registry();
    let mut failures = 0usize;

    for recipe_path in recipes {
        match Recipe::load(recipe_path) {
            Ok(recipe) => {
                let report = validate_recipe(&recipe, &registry);
                for warning in &report.warnings {
                    warn!(file = %recipe_path.display(), "{warning}");
                }
                if report.is_ok() {
                    info!(file = %recipe_path.display(), "Lint passed");
                } else {
                    failures += 1;
                    for error_msg in &report.errors {
                        error!(file = %recipe_path.display(), "{error_msg}");
                    }
                }
            }
            Err(err) => {
                failures += 1;
                error!(file = %recipe_path.display(), "Failed to load recipe: {err:#}");
            }
        }
    }

    if failures > 0 {
        bail!("Lint failed for {failures} recipe(s)");
    }

    info!("All recipe lint checks passed");
    Ok(())
}

fn build_registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    stages::register_defaults(&mut registry);
    registry
}

#[derive(Parser)]
#[command(
    name = "benchstage",
    version,
    about = "Staged download, build and run pipelines for HPC benchmarks"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recipe's pipeline on one or more platforms
    Run(RunArgs),
    ListStages,
    Validate {
        recipe: PathBuf,
    },
    Lock {
        recipe: PathBuf,
        output: PathBuf,
    },
    Recipe {
        #[command(subcommand)]
        action: RecipeCommands,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    recipe: PathBuf,
    /// Platform to run on; repeatable. Defaults to every declared platform.
    #[arg(long = "platform")]
    platforms: Vec<String>,
    #[arg(long)]
    environment: Option<String>,
    #[arg(long = "stage-root")]
    stage_root: Option<PathBuf>,
    #[arg(long = "output-root")]
    output_root: Option<PathBuf>,
    #[arg(long = "cache-root")]
    cache_root: Option<PathBuf>,
    #[arg(long)]
    shell: Option<String>,
    /// Write every pipeline report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
    #[arg(long = "metrics-prometheus")]
    metrics_prometheus: Option<PathBuf>,
    /// Exit successfully even when a value falls outside its reference band
    #[arg(long)]
    allow_performance_failures: bool,
}

#[derive(Subcommand)]
enum RecipeCommands {
    New {
        #[arg(long)]
        preset: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Lint {
        #[arg(required = true)]
        recipes: Vec<PathBuf>,
    },
    /// List the available presets
    Presets,
}
