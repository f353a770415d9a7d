use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::cache::CacheSpec;
use crate::perf::{ExtractMode, PerformanceSpec};
use crate::pipeline::{StageKind, StageSpec};
use crate::recipe::{PlatformMetadata, Recipe};
use crate::reference::{NhcValue, ReferenceEntry};
use crate::sanity::{ExpectedCount, LogSource, SanityCheck};
use crate::settings::SettingsSpec;
use crate::stages::{StageConfig, VariantOverride};

pub const PRESETS: &[&str] = &["stream", "hpl", "gridtools-cpu", "gridtools-gpu"];

const AZURE_ENV: &str = "gnu-azhpc";
const AOCC_TARBALL: &str = "aocc-compiler-3.2.0.tar";

pub fn preset(name: &str) -> Result<Recipe> {
    match name {
        "stream" => stream_preset(),
        "hpl" => hpl_preset(),
        "gridtools-cpu" => gridtools_preset(false),
        "gridtools-gpu" => gridtools_preset(true),
        other => bail!(
            "Unknown preset '{other}'. Available presets: {}",
            PRESETS.join(", ")
        ),
    }
}

pub fn generate_preset(name: &str, destination: &Path) -> Result<PathBuf> {
    let recipe = preset(name)?;
    let rendered = serde_yaml::to_string(&recipe)?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write preset recipe: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

fn stage(kind: StageKind, name: &str, config: StageConfig) -> Result<StageSpec> {
    let params = match serde_json::to_value(&config)? {
        Value::Object(map) => map,
        _ => bail!("stage '{name}' did not serialize to a mapping"),
    };
    Ok(StageSpec {
        stage: kind.as_str().to_string(),
        name: name.to_string(),
        params: Some(params),
    })
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn wget(url: &str) -> StageConfig {
    StageConfig {
        executable: Some("wget".into()),
        executable_opts: vec![url.to_string()],
        ..StageConfig::default()
    }
}

fn files_exist(files: &[&str]) -> Vec<SanityCheck> {
    vec![SanityCheck::FilesExist {
        files: strings(files),
    }]
}

fn hosts_count(pattern: &str, log: &str) -> SanityCheck {
    SanityCheck::PatternCount {
        pattern: pattern.to_string(),
        source: LogSource::File(log.to_string()),
        expected: ExpectedCount::HostsFile {
            hosts_file: "hosts.txt".into(),
        },
    }
}

fn node_metric(metric: &str, unit: &str, log: &str, key: &str, export: &str) -> PerformanceSpec {
    PerformanceSpec {
        metric: metric.to_string(),
        unit: unit.to_string(),
        pattern: None,
        source: LogSource::File(log.to_string()),
        mode: ExtractMode::PerNode,
        reference_key: Some(key.to_string()),
        hosts_file: Some("hosts.txt".into()),
        export: Some(export.to_string()),
        node_label: None,
    }
}

fn azure_platforms(metric: &str, values: [(&str, f64); 2]) -> BTreeMap<String, PlatformMetadata> {
    [("azure:hbv3", values[0]), ("azure:hbv2", values[1])]
        .into_iter()
        .map(|(platform, (variant, nominal))| {
            let metadata = PlatformMetadata {
                variant: Some(variant.to_string()),
                environments: vec![AZURE_ENV.to_string()],
                nhc_values: BTreeMap::from([
                    (metric.to_string(), NhcValue::Scalar(nominal)),
                    (
                        format!("{metric}_limits"),
                        NhcValue::Limits(vec![Some(-0.1), Some(0.1)]),
                    ),
                ]),
                ..PlatformMetadata::default()
            };
            (platform.to_string(), metadata)
        })
        .collect()
}

fn stream_preset() -> Result<Recipe> {
    let aocc_env = strings(&["sh aocc-compiler-3.2.0/install.sh", "source ./setenv_AOCC.sh"]);
    let zen2 = VariantOverride {
        executable_opts: Some(strings(&["-mavx2", "-arch zen2"])),
        ..VariantOverride::default()
    };
    let azure_only = strings(&[AZURE_ENV]);

    let pipeline = vec![
        stage(
            StageKind::Download,
            "aocc-download",
            StageConfig {
                description: Some("Download AOCC compiler".into()),
                valid_environments: azure_only.clone(),
                postrun_cmds: strings(&["tar -xf aocc-compiler-3.2.0.tar"]),
                sanity: files_exist(&[AOCC_TARBALL]),
                ..wget("https://developer.amd.com/wordpress/media/files/aocc-compiler-3.2.0.tar")
            },
        )?,
        stage(
            StageKind::Download,
            "stream-download",
            StageConfig {
                description: Some("Download STREAM sources".into()),
                valid_environments: azure_only.clone(),
                sanity: files_exist(&["stream.c"]),
                ..wget("https://raw.githubusercontent.com/jeffhammond/STREAM/master/stream.c")
            },
        )?,
        stage(
            StageKind::Build,
            "stream-build",
            StageConfig {
                description: Some("Build STREAM with AOCC".into()),
                valid_environments: azure_only.clone(),
                prerun_cmds: aocc_env.clone(),
                executable: Some(
                    "clang ./stream.c -o ./stream -fopenmp -mcmodel=large -DSTREAM_TYPE=double \
                     -DSTREAM_ARRAY_SIZE=260000000 -DNTIMES=100 -ffp-contract=fast -fnt-store \
                     -O3 -ffast-math -ffinite-loops"
                        .into(),
                ),
                sanity: files_exist(&["stream"]),
                variants: BTreeMap::from([
                    ("hbrs_v3".to_string(), zen2.clone()),
                    ("hbrs_v2".to_string(), zen2),
                ]),
                ..StageConfig::default()
            },
        )?,
        stage(
            StageKind::Download,
            "stream-scripts",
            StageConfig {
                description: Some("Download STREAM run scripts".into()),
                valid_environments: azure_only.clone(),
                postrun_cmds: strings(&[
                    "wget https://raw.githubusercontent.com/arstgr/stream/main/stream_run_script.sh",
                    "chmod +x stream_pssh_script.sh",
                    "chmod +x stream_run_script.sh",
                ]),
                sanity: files_exist(&["stream_pssh_script.sh", "stream_run_script.sh"]),
                ..wget("https://raw.githubusercontent.com/arstgr/stream/main/stream_pssh_script.sh")
            },
        )?,
        stage(
            StageKind::Run,
            "stream-run",
            StageConfig {
                description: Some("STREAM on all VMs using pssh".into()),
                valid_environments: azure_only,
                variables: BTreeMap::from([("VM_SERIES".to_string(), "{variant}".to_string())]),
                prerun_cmds: aocc_env,
                executable: Some("./stream_pssh_script.sh".into()),
                executable_opts: strings(&["{variant}"]),
                postrun_cmds: strings(&[
                    "list=($(ls -d stream-*)); for i in ${list[@]}; do cat $i/stream*.log; done",
                    "cat stream-test-results.log",
                ]),
                sanity: vec![hosts_count(r"stream: (\S+)", "stream-test-results.log")],
                performance: vec![node_metric(
                    "stream",
                    "MB/s",
                    "stream-test-results.log",
                    "stream_triad",
                    "stream_test_results.json",
                )],
                ..StageConfig::default()
            },
        )?,
    ];

    Ok(Recipe {
        version: 1,
        name: "stream".into(),
        description: Some("STREAM memory bandwidth across every VM in the host list".into()),
        settings: SettingsSpec::default(),
        platforms: azure_platforms("stream_triad", [("hbrs_v3", 330_000.0), ("hbrs_v2", 260_000.0)]),
        pipeline,
        source_dir: None,
    })
}

fn hpl_preset() -> Result<Recipe> {
    let modules_sh = strings(&[". /etc/profile.d/modules.sh"]);
    let hbv3_opts = strings(&[
        "--mca mpi_leave_pinned 1",
        "--bind-to none",
        "--report-bindings",
        "--mca btl self,vader",
        "--map-by ppr:1:l3cache",
        "-x OMP_NUM_THREADS=6",
        "-x OMP_PROC_BIND=TRUE",
        "-x OMP_PLACES=cores",
        "-x LD_LIBRARY_PATH",
        "-app ./appfile_ccx  >> hpl-$(hostname).log",
    ]);
    let hbv2_opts = strings(&[
        "-np 30",
        "--report-bindings",
        "--mca btl self,vader",
        "--map-by ppr:1:l3cache:pe=4",
        "-x OMP_NUM_THREADS=4",
        "-x OMP_PROC_BIND=TRUE",
        "-x OMP_PLACES=cores",
        "-x LD_LIBRARY_PATH",
        "./xhpl >> hpl-$(hostname).log",
    ]);

    let pipeline = vec![
        stage(
            StageKind::Download,
            "hpl-download",
            StageConfig {
                description: Some("Download HPL build script".into()),
                prerun_cmds: modules_sh.clone(),
                postrun_cmds: strings(&["chmod +x hpl_build_script.sh"]),
                sanity: files_exist(&["hpl_build_script.sh"]),
                cache: Some(CacheSpec {
                    marker: "hpl_build_script.sh".into(),
                    on_hit_cmds: strings(&["echo 'already ran'", "chmod +x hpl_build_script.sh"]),
                }),
                ..wget("https://raw.githubusercontent.com/arstgr/hpl/main/hpl_build_script.sh")
            },
        )?,
        stage(
            StageKind::Build,
            "hpl-build",
            StageConfig {
                description: Some("Build HPL".into()),
                prerun_cmds: modules_sh,
                executable: Some("./hpl_build_script.sh".into()),
                sanity: files_exist(&["xhpl"]),
                cache: Some(CacheSpec {
                    marker: "xhpl".into(),
                    on_hit_cmds: strings(&["echo 'already ran'", "rm -rf blis/.git"]),
                }),
                ..StageConfig::default()
            },
        )?,
        stage(
            StageKind::Run,
            "hpl-run",
            StageConfig {
                description: Some("HPL on a single VM".into()),
                prerun_cmds: strings(&[
                    "echo $(hostname)",
                    "mkdir HPL-$(hostname)",
                    "cd HPL-$(hostname)",
                    "echo $(hostname) > hosts.txt",
                    "cp ../HPL.dat .",
                    "cp ../appfile*_ccx .",
                    "cp ../xhpl_ccx.sh .",
                    "cp ../xhpl .",
                    "echo always | sudo tee /sys/kernel/mm/transparent_hugepage/enabled",
                    "echo always | sudo tee /sys/kernel/mm/transparent_hugepage/defrag",
                ]),
                executable: Some("mpirun".into()),
                postrun_cmds: strings(&[
                    "cat hpl*.log",
                    "echo system: $(hostname) HPL: $(grep WR hpl*.log | awk -F ' ' '{print $7}')  >> ../hpl-test-results.log",
                    "cp hosts.txt ../",
                    "cd ../",
                    "cat hpl-test-results.log",
                ]),
                sanity: vec![hosts_count(r"HPL: (\S+)", "hpl-test-results.log")],
                performance: vec![node_metric(
                    "HPL",
                    "Gflops",
                    "hpl-test-results.log",
                    "hpl_performance",
                    "hpl_test_results.json",
                )],
                variants: BTreeMap::from([
                    (
                        "hbrs_v3".to_string(),
                        VariantOverride {
                            executable_opts: Some(hbv3_opts),
                            ..VariantOverride::default()
                        },
                    ),
                    (
                        "hbrs_v2".to_string(),
                        VariantOverride {
                            executable_opts: Some(hbv2_opts),
                            prerun_cmds: strings(&[
                                r#"sed -i "s/4           Ps/6           Ps/g" HPL.dat"#,
                                r#"sed -i "s/4            Qs/5            Qs/g" HPL.dat"#,
                            ]),
                            ..VariantOverride::default()
                        },
                    ),
                ]),
                ..StageConfig::default()
            },
        )?,
    ];

    Ok(Recipe {
        version: 1,
        name: "hpl".into(),
        description: Some("HPL on a single VM, reusing cached downloads and builds".into()),
        settings: SettingsSpec::default(),
        platforms: azure_platforms("hpl_performance", [("hbrs_v3", 4_000.0), ("hbrs_v2", 3_000.0)]),
        pipeline,
        source_dir: None,
    })
}

fn gridtools_preset(gpu: bool) -> Result<Recipe> {
    let mut modules = strings(&["CMake", "Boost"]);
    let mut config_opts = strings(&[
        "-DCMAKE_CXX_FLAGS=-std=c++14",
        "-DCMAKE_CXX_COMPILER=CC",
        "-DCMAKE_C_COMPILER=cc",
        "-DCMAKE_Fortran_COMPILER=ftn",
        "-DGT_TESTS_REQUIRE_FORTRAN_COMPILER=ON",
        "-DGT_TESTS_REQUIRE_C_COMPILER=ON",
        r#"-DGT_TESTS_REQUIRE_OpenMP="ON""#,
    ]);
    let mut systems = strings(&["daint:gpu", "dom:gpu"]);
    // (variant, domain size, per-platform reference timers)
    let runs: Vec<(&str, [&str; 4], Vec<(&str, f64)>)> = if gpu {
        modules.push("cudatoolkit".into());
        config_opts.extend(strings(&["-DGT_CUDA_ARCH=sm_60", r#"-DGT_TESTS_REQUIRE_GPU="ON""#]));
        vec![
            (
                "gpu_double",
                ["512", "512", "160", "3"],
                vec![("daint:gpu", 0.004), ("dom:gpu", 0.004)],
            ),
            (
                "gpu_horizontal_double",
                ["512", "512", "160", "3"],
                vec![("daint:gpu", 0.003), ("dom:gpu", 0.003)],
            ),
        ]
    } else {
        config_opts.push(r#"-DGT_TESTS_REQUIRE_GPU="OFF""#.into());
        systems.extend(strings(&["daint:mc", "dom:mc"]));
        vec![
            (
                "cpu_kfirst_double",
                ["256", "256", "80", "3"],
                vec![
                    ("daint:mc", 11.0),
                    ("daint:gpu", 1.0),
                    ("dom:mc", 11.0),
                    ("dom:gpu", 1.0),
                ],
            ),
            (
                "cpu_ifirst_double",
                ["256", "256", "80", "3"],
                vec![
                    ("daint:mc", 9.0),
                    ("daint:gpu", 1.0),
                    ("dom:mc", 9.0),
                    ("dom:gpu", 1.0),
                ],
            ),
        ]
    };
    config_opts.push("../gridtools".into());
    let flavor = if gpu { "gpu" } else { "cpu" };
    let builtin = strings(&["builtin"]);

    let mut pipeline = vec![
        stage(
            StageKind::Download,
            "gridtools-download",
            StageConfig {
                description: Some("Clone GridTools".into()),
                valid_platforms: systems.clone(),
                valid_environments: builtin.clone(),
                executable: Some("git".into()),
                executable_opts: strings(&[
                    "clone",
                    "--depth",
                    "1",
                    "https://github.com/GridTools/gridtools.git",
                    "gridtools",
                ]),
                sanity: files_exist(&["gridtools/CMakeLists.txt"]),
                ..StageConfig::default()
            },
        )?,
        stage(
            StageKind::Build,
            &format!("gridtools-{flavor}-build"),
            StageConfig {
                description: Some(format!("GridTools {} build test", flavor.to_uppercase())),
                valid_platforms: systems.clone(),
                valid_environments: builtin.clone(),
                modules: modules.clone(),
                prerun_cmds: strings(&["mkdir -p build", "cd build"]),
                executable: Some("cmake".into()),
                executable_opts: config_opts,
                postrun_cmds: strings(&["make -j 2 perftests", "ls tests/regression/"]),
                sanity: vec![SanityCheck::PatternFound {
                    pattern: "perftest".into(),
                    source: LogSource::Stdout,
                }],
                ..StageConfig::default()
            },
        )?,
    ];

    let mut platforms: BTreeMap<String, PlatformMetadata> = systems
        .iter()
        .map(|name| {
            (
                name.clone(),
                PlatformMetadata {
                    environments: builtin.clone(),
                    ..PlatformMetadata::default()
                },
            )
        })
        .collect();

    for (variant, domain, references) in runs {
        let key = format!("{variant}_timer");
        for (platform, value) in references {
            if let Some(metadata) = platforms.get_mut(platform) {
                metadata.references.insert(
                    key.clone(),
                    ReferenceEntry {
                        value,
                        lower: None,
                        upper: Some(0.1),
                        unit: Some("s".into()),
                    },
                );
            }
        }
        let mut opts = strings(&domain);
        opts.push(format!("'--gtest_filter=horizontal_diffusion/{variant}*'"));
        pipeline.push(stage(
            StageKind::Run,
            &format!("gridtools-{}", variant.replace('_', "-")),
            StageConfig {
                description: Some(format!("GridTools {} run test", flavor.to_uppercase())),
                valid_platforms: systems.clone(),
                valid_environments: builtin.clone(),
                modules: modules.clone(),
                executable: Some("./build/tests/regression/perftests".into()),
                executable_opts: opts,
                sanity: vec![SanityCheck::PatternFound {
                    pattern: "PASSED".into(),
                    source: LogSource::Stdout,
                }],
                performance: vec![PerformanceSpec {
                    metric: "timer".into(),
                    unit: "s".into(),
                    pattern: None,
                    source: LogSource::Stdout,
                    mode: ExtractMode::SeriesAverage,
                    reference_key: Some(key),
                    hosts_file: None,
                    export: None,
                    node_label: None,
                }],
                ..StageConfig::default()
            },
        )?);
    }

    Ok(Recipe {
        version: 1,
        name: format!("gridtools-{flavor}"),
        description: Some(format!(
            "GridTools horizontal diffusion perftests on {}",
            flavor.to_uppercase()
        )),
        settings: SettingsSpec::default(),
        platforms,
        pipeline,
        source_dir: None,
    })
}
