//! Individual Job Execution
//!
//! Handles running a single resolved job:
//! - Input re-check
//! - Output and log directory creation
//! - Script generation
//! - Environment activation (conda/system)
//! - Log redirection and output verification

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, error, warn};

use crate::environment::conda::run_in_env;
use crate::error::{Error, Result};
use crate::workflow::Job;

/// Where and how a job runs.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    /// Directory relative paths are resolved against
    pub working_dir: PathBuf,
    /// Conda prefix to run inside, if any
    pub conda_prefix: Option<PathBuf>,
}

impl JobContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            conda_prefix: None,
        }
    }

    pub fn with_conda_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.conda_prefix = Some(prefix.into());
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.working_dir.join(path)
    }
}

/// Executes a single job.
///
/// On a non-zero exit the job's outputs are removed and
/// [`Error::JobFailed`] is returned. A zero exit that leaves a declared
/// output missing is [`Error::MissingOutput`].
pub fn execute_job(job: &Job, ctx: &JobContext) -> Result<()> {
    for input in job.input_paths() {
        if !ctx.resolve(input).exists() {
            return Err(Error::MissingInput {
                path: input.to_string(),
                rule: Some(job.rule.clone()),
            });
        }
    }

    ensure_parent_directories(
        job.output.iter().chain(job.log.iter()).map(|p| ctx.resolve(p)),
    )?;

    let script_path = create_execution_script(&job.id, &job.command)?;

    let mut cmd = match &ctx.conda_prefix {
        Some(prefix) => {
            debug!("Job '{}' runs in conda prefix {}", job.id, prefix.display());
            run_in_env(prefix, &script_path)
        }
        None => {
            let mut cmd = Command::new("bash");
            cmd.arg(&script_path);
            cmd
        }
    };
    cmd.current_dir(&ctx.working_dir);

    let result = match &job.log {
        Some(log) => run_logged(&mut cmd, &ctx.resolve(log)),
        None => run_captured(&mut cmd, &job.id),
    };

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("Failed to clean up script {}: {}", script_path.display(), e);
    }

    let status = result?;
    if !status.success() {
        error!("Job '{}' failed with exit code: {:?}", job.id, status.code());
        remove_outputs(job, ctx);
        return Err(Error::JobFailed {
            job: job.id.clone(),
            code: status.code(),
            log: job.log.clone(),
        });
    }

    if let Some(missing) = job.output.iter().find(|o| !ctx.resolve(o).exists()) {
        error!("Job '{}' did not produce '{}'", job.id, missing);
        let missing = missing.clone();
        remove_outputs(job, ctx);
        return Err(Error::MissingOutput {
            job: job.id.clone(),
            path: missing,
        });
    }

    debug!("Job '{}' completed successfully", job.id);
    Ok(())
}

/// Runs with stdout and stderr both appended to the log file.
fn run_logged(cmd: &mut Command, log_path: &Path) -> Result<ExitStatus> {
    let log_file = File::create(log_path).map_err(|e| Error::io(log_path, e))?;
    let stderr_file = log_file.try_clone().map_err(|e| Error::io(log_path, e))?;

    cmd.stdout(Stdio::from(log_file)).stderr(Stdio::from(stderr_file));
    debug!("Redirecting output to {}", log_path.display());

    cmd.status().map_err(|e| Error::io(log_path, e))
}

/// Runs with output captured and forwarded to the logger.
fn run_captured(cmd: &mut Command, job_id: &str) -> Result<ExitStatus> {
    let output = cmd
        .output()
        .map_err(|e| Error::io(cmd.get_program(), e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !stdout.trim().is_empty() {
        debug!("Job '{}' stdout:\n{}", job_id, stdout);
    }
    if !stderr.trim().is_empty() {
        if output.status.success() {
            debug!("Job '{}' stderr:\n{}", job_id, stderr);
        } else {
            error!("stderr:\n{}", stderr);
        }
    }

    Ok(output.status)
}

/// Removes whatever outputs a failed job left behind.
fn remove_outputs(job: &Job, ctx: &JobContext) {
    for output in &job.output {
        let path = ctx.resolve(output);
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else if path.exists() {
            fs::remove_file(&path)
        } else {
            continue;
        };

        match removed {
            Ok(()) => warn!("Removed output of failed job '{}': {}", job.id, output),
            Err(e) => warn!("Failed to remove '{}': {}", path.display(), e),
        }
    }
}

/// Creates parent directories for output and log files.
fn ensure_parent_directories(paths: impl Iterator<Item = PathBuf>) -> Result<()> {
    for path in paths {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                debug!("Created directory: {}", parent.display());
            }
        }
    }
    Ok(())
}

static SCRIPT_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Unique, file-name-safe script name for a job.
fn script_name(job_id: &str) -> String {
    let safe: String = job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let seq = SCRIPT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("job_{}_{}_{}.sh", std::process::id(), seq, safe)
}

/// Creates a temporary bash script for job execution.
fn create_execution_script(job_id: &str, command_text: &str) -> Result<PathBuf> {
    let script_dir = std::env::temp_dir().join("ont_rdb_scripts");
    fs::create_dir_all(&script_dir).map_err(|e| Error::io(&script_dir, e))?;

    let script_path = script_dir.join(script_name(job_id));
    let write_script = || -> std::io::Result<()> {
        let mut file = File::create(&script_path)?;
        writeln!(file, "#!/bin/bash")?;
        writeln!(file, "set -euo pipefail")?;
        writeln!(file, "{}", command_text)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    };
    write_script().map_err(|e| Error::io(&script_path, e))?;

    Ok(script_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::wildcards::Wildcards;
    use crate::workflow::NamedPath;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn job(command: &str, input: Vec<&str>, output: Vec<&str>, log: Option<&str>) -> Job {
        Job {
            id: "convert[ontology_name=hic]".to_string(),
            rule: "convert".to_string(),
            wildcards: Wildcards::new(),
            input: input.into_iter().map(NamedPath::positional).collect(),
            output: output.into_iter().map(str::to_string).collect(),
            params: BTreeMap::new(),
            log: log.map(str::to_string),
            conda: None,
            command: command.to_string(),
            threads: 1,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn test_script_name_is_file_safe() {
        let name = script_name("convert[ontology_name=hic,x=a/b]");
        assert!(name.starts_with("job_"));
        assert!(name.ends_with("_convert_ontology_name_hic_x_a_b_.sh"));
        assert_ne!(name, script_name("convert[ontology_name=hic,x=a/b]"));
    }

    #[test]
    fn test_create_execution_script() {
        let script_path = create_execution_script("test_job", "echo 'hello world'").unwrap();
        let content = fs::read_to_string(&script_path).unwrap();

        assert!(content.starts_with("#!/bin/bash\nset -euo pipefail\n"));
        assert!(content.contains("echo 'hello world'"));

        fs::remove_file(script_path).unwrap();
    }

    #[test]
    fn test_execute_job_writes_output_and_log() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("in.txt"), "ontology").unwrap();

        let job = job(
            "cat in.txt > out/df.pkl; echo building; echo warn >&2",
            vec!["in.txt"],
            vec!["out/df.pkl"],
            Some("logs/hic.log"),
        );
        execute_job(&job, &JobContext::new(dir.path())).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("out/df.pkl")).unwrap(), "ontology");
        let log = fs::read_to_string(dir.path().join("logs/hic.log")).unwrap();
        assert!(log.contains("building"));
        assert!(log.contains("warn"));
    }

    #[test]
    fn test_execute_job_failure_removes_output() {
        let dir = tempdir().unwrap();
        let job = job(
            "echo partial > out.pkl; echo boom >&2; exit 3",
            vec![],
            vec!["out.pkl"],
            Some("logs/fail.log"),
        );

        match execute_job(&job, &JobContext::new(dir.path())) {
            Err(Error::JobFailed { code, log, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(log.as_deref(), Some("logs/fail.log"));
            }
            other => panic!("expected JobFailed, got {:?}", other),
        }

        assert!(!dir.path().join("out.pkl").exists());
        let log = fs::read_to_string(dir.path().join("logs/fail.log")).unwrap();
        assert!(log.contains("boom"));
    }

    #[test]
    fn test_execute_job_pipefail() {
        let dir = tempdir().unwrap();
        let job = job("false | cat > out.txt", vec![], vec!["out.txt"], None);

        let result = execute_job(&job, &JobContext::new(dir.path()));
        assert!(matches!(result, Err(Error::JobFailed { .. })));
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_execute_job_missing_output() {
        let dir = tempdir().unwrap();
        let job = job("true", vec![], vec!["never.txt"], None);

        match execute_job(&job, &JobContext::new(dir.path())) {
            Err(Error::MissingOutput { path, .. }) => assert_eq!(path, "never.txt"),
            other => panic!("expected MissingOutput, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_job_missing_input_runs_nothing() {
        let dir = tempdir().unwrap();
        let job = job(
            "touch out.txt",
            vec!["ontologies/absent_ontology.py"],
            vec!["out.txt"],
            Some("logs/absent.log"),
        );

        let result = execute_job(&job, &JobContext::new(dir.path()));
        assert!(matches!(result, Err(Error::MissingInput { .. })));
        assert!(!dir.path().join("out.txt").exists());
        assert!(!dir.path().join("logs").exists());
    }

    #[test]
    fn test_ensure_parent_directories() {
        let dir = tempdir().unwrap();
        ensure_parent_directories(
            vec![dir.path().join("a/b/out.txt"), PathBuf::from("plain.txt")].into_iter(),
        )
        .unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
