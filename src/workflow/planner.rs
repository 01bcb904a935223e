//! Execution Planner
//!
//! Manages job scheduling including:
//! - Dependency tracking
//! - Thread budget allocation
//! - Job status and timing

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::{debug, info};

use super::dag::{Job, JobGraph};

/// Status of a job during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Job is waiting for dependencies
    Pending,
    /// Job is currently executing
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed with error message
    Failed(String),
    /// Job was skipped (outputs up to date)
    Skipped,
}

/// Execution metrics for a single job.
#[derive(Debug, Clone)]
pub struct JobMetrics {
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub duration_ms: Option<u128>,
    pub status: JobStatus,
}

impl JobMetrics {
    fn new() -> Self {
        Self {
            start_time: None,
            end_time: None,
            duration_ms: None,
            status: JobStatus::Pending,
        }
    }

    fn finish(&mut self, status: JobStatus) {
        self.end_time = Some(Instant::now());
        if let Some(start) = self.start_time {
            self.duration_ms = Some(start.elapsed().as_millis());
        }
        self.status = status;
    }
}

/// Tracks which jobs are done, which are running and how many threads
/// are in use.
///
/// Jobs that don't need to run are marked [`JobStatus::Skipped`] up front
/// and count as finished for dependency purposes.
pub struct ExecutionPlanner {
    jobs: Vec<Job>,
    dry_run: bool,
    finished: HashSet<String>,
    running: HashSet<String>,
    failed: HashSet<String>,
    metrics: HashMap<String, JobMetrics>,
    threads_in_use: usize,
    max_threads: usize,
}

impl ExecutionPlanner {
    /// Creates a planner for `graph`, where only jobs in `to_run` execute.
    ///
    /// # Arguments
    ///
    /// * `graph` - The resolved job graph
    /// * `to_run` - IDs of jobs that are not up to date
    /// * `max_threads` - Thread budget (`0` means all CPUs)
    /// * `dry_run` - If true, jobs are listed but not executed
    pub fn new(graph: &JobGraph, to_run: &HashSet<String>, max_threads: usize, dry_run: bool) -> Self {
        let max_threads = if max_threads == 0 {
            num_cpus::get()
        } else {
            max_threads
        };

        info!(
            "Creating planner: {} jobs ({} to run), {} threads",
            graph.len(),
            to_run.len(),
            max_threads
        );

        let mut finished = HashSet::new();
        let mut metrics = HashMap::new();
        for job in &graph.jobs {
            let mut m = JobMetrics::new();
            if !to_run.contains(&job.id) {
                m.status = JobStatus::Skipped;
                finished.insert(job.id.clone());
            }
            metrics.insert(job.id.clone(), m);
        }

        Self {
            jobs: graph.jobs.clone(),
            dry_run,
            finished,
            running: HashSet::new(),
            failed: HashSet::new(),
            metrics,
            threads_in_use: 0,
            max_threads,
        }
    }

    /// Threads a job is charged, clamped to the budget so oversized jobs
    /// can still run alone.
    fn job_threads(&self, job: &Job) -> usize {
        job.threads.clamp(1, self.max_threads)
    }

    /// Returns jobs that are ready to execute.
    ///
    /// A job is ready if:
    /// - It hasn't finished, started or failed
    /// - All its dependencies have finished
    /// - Its threads fit in the remaining budget
    pub fn get_ready_jobs(&self) -> Vec<Job> {
        let mut ready = Vec::new();
        let mut threads_to_allocate = 0;

        for job in &self.jobs {
            if self.finished.contains(&job.id)
                || self.running.contains(&job.id)
                || self.failed.contains(&job.id)
            {
                continue;
            }

            if !job.dependencies.iter().all(|d| self.finished.contains(d)) {
                continue;
            }

            let threads = self.job_threads(job);
            if self.threads_in_use + threads_to_allocate + threads > self.max_threads {
                debug!(
                    "Job '{}' needs {} threads but only {} available",
                    job.id,
                    threads,
                    self.max_threads
                        .saturating_sub(self.threads_in_use + threads_to_allocate)
                );
                continue;
            }

            ready.push(job.clone());
            threads_to_allocate += threads;
        }

        ready
    }

    fn find_threads(&self, job_id: &str) -> usize {
        self.jobs
            .iter()
            .find(|j| j.id == job_id)
            .map(|j| self.job_threads(j))
            .unwrap_or(0)
    }

    /// Marks a job as running.
    pub fn mark_job_running(&mut self, job_id: &str) {
        self.running.insert(job_id.to_string());
        self.threads_in_use += self.find_threads(job_id);
        debug!(
            "Job '{}' started (threads {}/{})",
            job_id, self.threads_in_use, self.max_threads
        );

        if let Some(metrics) = self.metrics.get_mut(job_id) {
            metrics.start_time = Some(Instant::now());
            metrics.status = JobStatus::Running;
        }
    }

    /// Marks a job as completed.
    pub fn mark_job_completed(&mut self, job_id: &str) {
        self.running.remove(job_id);
        self.finished.insert(job_id.to_string());
        self.threads_in_use = self.threads_in_use.saturating_sub(self.find_threads(job_id));

        if let Some(metrics) = self.metrics.get_mut(job_id) {
            metrics.finish(JobStatus::Completed);
        }
    }

    /// Marks a job as failed.
    pub fn mark_job_failed(&mut self, job_id: &str, error: String) {
        self.running.remove(job_id);
        self.failed.insert(job_id.to_string());
        self.threads_in_use = self.threads_in_use.saturating_sub(self.find_threads(job_id));

        if let Some(metrics) = self.metrics.get_mut(job_id) {
            metrics.finish(JobStatus::Failed(error));
        }
    }

    /// Returns true if there are more jobs to execute.
    pub fn has_work_remaining(&self) -> bool {
        self.finished.len() + self.failed.len() < self.jobs.len()
    }

    /// Returns true if any job is running.
    pub fn has_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Returns the current progress as (finished, total).
    pub fn progress(&self) -> (usize, usize) {
        (self.finished.len(), self.jobs.len())
    }

    /// Returns metrics for all jobs.
    pub fn get_metrics(&self) -> &HashMap<String, JobMetrics> {
        &self.metrics
    }

    /// Counts jobs with the given status.
    pub fn count_status(&self, status: &JobStatus) -> usize {
        self.metrics
            .values()
            .filter(|m| match (&m.status, status) {
                (JobStatus::Failed(_), JobStatus::Failed(_)) => true,
                (a, b) => a == b,
            })
            .count()
    }

    /// Returns the thread budget.
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Returns whether this is a dry run.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
