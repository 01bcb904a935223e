//! Workflow Execution Module
//!
//! Runs resolved jobs: parallel scheduling in [`engine`], single-job
//! execution in [`job`].

pub mod engine;
pub mod job;

pub use engine::{Engine, RunSummary};
pub use job::{execute_job, JobContext};
