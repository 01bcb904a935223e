//! Workflow Parser
//!
//! Handles loading workflow definitions from YAML files, applying
//! command-line config overrides and validating the result.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde_yaml::Value;

use super::model::Workflow;
use super::validator::validate_workflow;
use crate::error::{Error, Result};

/// Parses workflow YAML without validating it.
pub fn parse_workflow(yaml: &str) -> Result<Workflow> {
    let workflow: Workflow = serde_yaml::from_str(yaml)?;
    debug!(
        "Parsed {} rules, {} config keys",
        workflow.rules.len(),
        workflow.config.len()
    );
    Ok(workflow)
}

/// Applies `KEY=VALUE` overrides to the workflow's config map.
///
/// Values are parsed as YAML scalars, so `threads=4` becomes a number and
/// `path=informant_class.py` stays a string.
pub fn apply_config_overrides(workflow: &mut Workflow, overrides: &[String]) -> Result<()> {
    for entry in overrides {
        let (key, raw) = entry.split_once('=').ok_or_else(|| {
            Error::Validation(vec![format!(
                "Invalid config override '{}': expected KEY=VALUE",
                entry
            )])
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Validation(vec![format!(
                "Invalid config override '{}': empty key",
                entry
            )]));
        }

        let value = match serde_yaml::from_str::<Value>(raw) {
            Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => v,
            _ => Value::String(raw.to_string()),
        };

        info!("Config override: {} = {}", key, raw);
        workflow.config.insert(key.to_string(), value);
    }
    Ok(())
}

/// Loads a workflow from a YAML file.
///
/// Overrides are applied before validation so they can satisfy config
/// keys the file leaves unset.
///
/// # Example
///
/// ```rust,no_run
/// use ont_rdb::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let overrides = vec!["informant_class_path=src/informant_class.py".to_string()];
///     let workflow = load_workflow("workflow.yaml", &overrides)?;
///     println!("Loaded {} rules", workflow.rules.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>, overrides: &[String]) -> Result<Workflow> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let mut workflow = parse_workflow(&yaml_content)?;
    apply_config_overrides(&mut workflow, overrides)?;
    validate_workflow(&workflow)?;

    Ok(workflow)
}
