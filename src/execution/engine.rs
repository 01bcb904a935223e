//! Workflow Execution Engine
//!
//! The core engine that turns requested targets into finished files:
//! - Job graph resolution and up-to-date detection
//! - Conda environment setup for rules that declare one
//! - Parallel job scheduling within a thread budget
//! - Dry-run listing and a run summary
//!
//! Relative paths are resolved against the process working directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use log::{error, info, warn};
use serde::Serialize;

use crate::environment::conda::ensure_env;
use crate::error::{Error, Result};
use crate::workflow::{ExecutionPlanner, Job, JobGraph, JobStatus, Workflow};

use super::job::{execute_job, JobContext};

/// Outcome counts for one run.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Jobs in the resolved graph
    pub total: usize,
    /// Jobs that ran (or would run, in a dry run) and succeeded
    pub completed: usize,
    /// Jobs whose outputs were already up to date
    pub skipped: usize,
    pub failed: usize,
    #[serde(skip)]
    pub duration: Duration,
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use ont_rdb::execution::Engine;
/// use ont_rdb::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("workflow.yaml", &[])?;
///     let mut engine = Engine::new(workflow);
///     engine.set_targets(vec!["ontology_dataframes/hic_ontology_dataframe.pkl".to_string()]);
///     engine.set_cores(4);
///
///     engine.run()?;
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    targets: Vec<String>,
    cores: usize,
    dry_run: bool,
    force: bool,
    use_conda: bool,
}

impl Engine {
    /// Creates a new execution engine for a workflow.
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            targets: Vec::new(),
            cores: 0,
            dry_run: false,
            force: false,
            use_conda: false,
        }
    }

    /// Sets the requested targets (paths or wildcard-free rule names).
    pub fn set_targets(&mut self, targets: Vec<String>) {
        self.targets = targets;
    }

    /// Sets the thread budget; `0` uses every CPU.
    pub fn set_cores(&mut self, cores: usize) {
        self.cores = cores;
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Runs every job regardless of output timestamps.
    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    /// Runs rules with a `conda` descriptor inside that environment.
    pub fn set_use_conda(&mut self, use_conda: bool) {
        self.use_conda = use_conda;
    }

    /// Resolves the job graph for the configured targets.
    pub fn plan(&self) -> Result<JobGraph> {
        JobGraph::build(&self.workflow, &self.targets)
    }

    /// Executes the workflow.
    ///
    /// This is the main entry point that:
    /// 1. Resolves targets into a job graph (failing on missing inputs)
    /// 2. Works out which jobs are out of date
    /// 3. Sets up conda environments for those jobs
    /// 4. Executes them in parallel, in dependency order
    /// 5. Reports final results
    ///
    /// After a failure no new jobs start; running jobs finish and the
    /// first error is returned.
    pub fn run(&mut self) -> Result<RunSummary> {
        let start_time = Instant::now();

        let graph = self.plan()?;
        let to_run = graph.jobs_to_run(self.force);

        if to_run.is_empty() {
            println!("Nothing to be done: all {} job(s) up to date.", graph.len());
            return Ok(RunSummary {
                total: graph.len(),
                skipped: graph.len(),
                duration: start_time.elapsed(),
                ..RunSummary::default()
            });
        }

        let prefixes = if self.use_conda && !self.dry_run {
            self.setup_environments(&graph, &to_run)?
        } else {
            BTreeMap::new()
        };

        let mut planner = ExecutionPlanner::new(&graph, &to_run, self.cores, self.dry_run);

        info!(
            "Starting execution ({} of {} jobs, {} threads, dry run: {})",
            to_run.len(),
            graph.len(),
            planner.max_threads(),
            self.dry_run
        );

        let (tx, rx): (Sender<(String, Result<()>)>, Receiver<(String, Result<()>)>) = channel();

        let mut running_count = 0;
        let mut failure: Option<Error> = None;

        loop {
            if failure.is_none() {
                for job in planner.get_ready_jobs() {
                    planner.mark_job_running(&job.id);

                    if self.dry_run {
                        print_dry_run(&job);
                        planner.mark_job_completed(&job.id);
                        continue;
                    }

                    info!("{} {}", "Starting job:".bold(), job.id);
                    let ctx = job_context(&job, &prefixes);
                    let tx = tx.clone();

                    thread::spawn(move || {
                        let result = execute_job(&job, &ctx);
                        if let Err(e) = tx.send((job.id.clone(), result)) {
                            error!("Failed to send completion signal: {}", e);
                        }
                    });

                    running_count += 1;
                }
            }

            if running_count == 0 {
                if failure.is_some() || !planner.has_work_remaining() {
                    break;
                }
                if planner.get_ready_jobs().is_empty() {
                    warn!("No runnable jobs left but work remains; stopping");
                    break;
                }
                continue;
            }

            let Ok((job_id, result)) = rx.recv() else {
                error!("Completion channel closed with {} job(s) running", running_count);
                break;
            };
            running_count -= 1;

            match result {
                Ok(()) => {
                    let (done, total) = planner.progress();
                    info!(
                        "Job '{}' completed successfully ({}/{})",
                        job_id,
                        done + 1,
                        total
                    );
                    planner.mark_job_completed(&job_id);
                }
                Err(e) => {
                    error!("Job '{}' failed: {}", job_id, e);
                    planner.mark_job_failed(&job_id, e.to_string());
                    if failure.is_none() {
                        if running_count > 0 {
                            warn!("Waiting for {} running job(s) to finish", running_count);
                        }
                        failure = Some(e);
                    }
                }
            }
        }

        let summary = RunSummary {
            total: graph.len(),
            completed: planner.count_status(&JobStatus::Completed),
            skipped: planner.count_status(&JobStatus::Skipped),
            failed: planner.count_status(&JobStatus::Failed(String::new())),
            duration: start_time.elapsed(),
        };
        print_summary(&summary, self.dry_run);

        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Creates the conda environments needed by jobs that will run,
    /// returning descriptor -> prefix.
    fn setup_environments(
        &self,
        graph: &JobGraph,
        to_run: &HashSet<String>,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let descriptors: HashSet<&str> = graph
            .jobs
            .iter()
            .filter(|j| to_run.contains(&j.id))
            .filter_map(|j| j.conda.as_deref())
            .collect();

        if descriptors.is_empty() {
            info!("No conda environments required");
            return Ok(BTreeMap::new());
        }

        info!("Setting up {} conda environment(s)", descriptors.len());

        let mut prefixes = BTreeMap::new();
        for descriptor in descriptors {
            let prefix = ensure_env(Path::new(descriptor), Path::new("."))?;
            info!("Environment '{}' ready at {}", descriptor, prefix.display());
            prefixes.insert(descriptor.to_string(), prefix);
        }
        Ok(prefixes)
    }
}

fn job_context(job: &Job, prefixes: &BTreeMap<String, PathBuf>) -> JobContext {
    let ctx = JobContext::new(".");
    match job.conda.as_ref().and_then(|c| prefixes.get(c)) {
        Some(prefix) => ctx.with_conda_prefix(prefix),
        None => ctx,
    }
}

fn print_dry_run(job: &Job) {
    println!();
    println!("{} {}", "[DRY RUN] Job:".yellow().bold(), job.id);
    println!("  Rule: {}", job.rule);
    if !job.wildcards.is_empty() {
        let wildcards: Vec<String> = job
            .wildcards
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("  Wildcards: {}", wildcards.join(", "));
    }
    println!("  Input: {:?}", job.input_paths());
    println!("  Output: {:?}", job.output);
    if let Some(log) = &job.log {
        println!("  Log: {}", log);
    }
    if let Some(conda) = &job.conda {
        println!("  Conda: {}", conda);
    }
    println!("  Threads: {}", job.threads);
    println!("  Command: {}", job.command.cyan());
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!();
    if summary.failed > 0 {
        println!("{}", "Workflow failed".red().bold());
    } else if dry_run {
        println!("{}", "Dry run complete".yellow().bold());
    } else {
        println!("{}", "Workflow completed successfully".green().bold());
    }

    let verb = if dry_run { "would run" } else { "completed" };
    println!(
        "  {} {}, {} up to date, {} failed ({} total)",
        summary.completed, verb, summary.skipped, summary.failed, summary.total
    );
    println!("  Total execution time: {:.2?}", summary.duration);
}
