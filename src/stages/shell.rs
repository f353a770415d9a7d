use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::cache::path_component;
use crate::error::{PipelineError, StageResult};
use crate::pipeline::ExecutionLog;

/// A rendered stage script together with the environment it runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub lines: Vec<String>,
    pub variables: BTreeMap<String, String>,
}

impl Script {
    pub fn body(&self) -> String {
        let mut body = self.lines.join("\n");
        body.push('\n');
        body
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.trim().is_empty())
    }
}

/// Runs `script` with `<shell> -c` inside `workdir` and persists the
/// script as `<stage>.sh` and its output as `<stage>.out` and `<stage>.err`,
/// with the stage name cleaned by [`path_component`].
/// The exit code is captured but never turned into an error.
pub fn run_script(
    stage: &str,
    shell: &str,
    script: &Script,
    workdir: &Path,
) -> StageResult<ExecutionLog> {
    let body = script.body();
    let file_stem = path_component(stage);
    let script_path = workdir.join(format!("{file_stem}.sh"));
    fs::write(&script_path, &body)
        .map_err(|err| PipelineError::io(format!("writing {}", script_path.display()), err))?;

    debug!(
        stage,
        shell,
        script = %script_path.display(),
        lines = script.lines.len(),
        "Launching stage script"
    );
    let output = Command::new(shell)
        .arg("-c")
        .arg(&body)
        .current_dir(workdir)
        .envs(&script.variables)
        .output()
        .map_err(|source| PipelineError::Execution {
            stage: stage.to_string(),
            source,
        })?;

    let stdout_path = workdir.join(format!("{file_stem}.out"));
    let stderr_path = workdir.join(format!("{file_stem}.err"));
    fs::write(&stdout_path, &output.stdout)
        .map_err(|err| PipelineError::io(format!("writing {}", stdout_path.display()), err))?;
    fs::write(&stderr_path, &output.stderr)
        .map_err(|err| PipelineError::io(format!("writing {}", stderr_path.display()), err))?;

    Ok(ExecutionLog {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        stdout_path: Some(stdout_path),
        stderr_path: Some(stderr_path),
    })
}
