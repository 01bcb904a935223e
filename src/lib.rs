//! ont_rdb - Ontology Dataframe Build Rules
//!
//! Runs the declarative rule that converts an ontology script into an
//! ontology dataframe (`ontologies/{ontology_name}_ontology.py` ->
//! `ontology_dataframes/{ontology_name}_ontology_dataframe.pkl`), and
//! scaffolds projects that use the results.
//!
//! # Architecture
//!
//! - [`workflow`]: Rule definitions, wildcard resolution and job graphs
//! - [`execution`]: Parallel job execution
//! - [`environment`]: Conda/micromamba integration
//! - [`project`]: Project launch and consolidation
//! - [`error`]: Crate-wide error type
//!
//! # Example
//!
//! ```rust,no_run
//! use ont_rdb::execution::Engine;
//! use ont_rdb::load_workflow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = load_workflow("workflow.yaml", &[])?;
//!
//!     let mut engine = Engine::new(workflow);
//!     engine.set_targets(vec!["ontology_dataframes/hic_ontology_dataframe.pkl".to_string()]);
//!     engine.set_cores(4);
//!
//!     let summary = engine.run()?;
//!     println!("{} job(s) ran", summary.completed);
//!     Ok(())
//! }
//! ```

pub mod environment;
pub mod error;
pub mod execution;
pub mod project;
pub mod workflow;

pub use error::{Error, Result};
pub use execution::engine::{Engine, RunSummary};
pub use workflow::dag::{Job, JobGraph};
pub use workflow::model::{Rule, Workflow};
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ont_rdb";
