//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing,
//! validating and resolving rule-based workflows.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Rule, Workflow)
//! - [`parser`]: YAML parsing, loading and config overrides
//! - [`validator`]: Validation of rules and templates
//! - [`wildcards`]: Wildcard matching and substitution
//! - [`template`]: Params and shell template rendering
//! - [`dag`]: Target resolution into a job graph
//! - [`planner`]: Execution planning and scheduling

pub mod dag;
pub mod model;
pub mod parser;
pub mod planner;
pub mod template;
pub mod validator;
pub mod wildcards;

pub use dag::{Job, JobGraph};
pub use model::{NamedPath, Rule, Workflow};
pub use parser::{apply_config_overrides, load_workflow, parse_workflow};
pub use planner::{ExecutionPlanner, JobStatus};
pub use validator::validate_workflow;
pub use wildcards::{has_wildcards, Wildcards};
