//! Project Scaffolding Module
//!
//! - [`launch`]: create a project skeleton linked to shared sources
//! - [`consolidate`]: turn those links into local copies

pub mod consolidate;
pub mod launch;

pub use consolidate::consolidate_project;
pub use launch::{launch_project, parse_metadata, LaunchOptions, ProjectMetadata};
