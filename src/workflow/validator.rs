//! Workflow Validation
//!
//! Provides validation for workflow structures including:
//! - Rule field validation
//! - Wildcard coverage (every wildcard in inputs and log is bound by the outputs)
//! - Template checking against the rule's own fields
//! - Wildcard constraint compilation

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{debug, info, warn};
use thiserror::Error;

use super::model::{Rule, Workflow};
use super::template::TemplateContext;
use super::wildcards::{extract_wildcard_names, PatternMatcher, Wildcards};
use crate::error::{Error, Result};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Workflow has no rules")]
    EmptyWorkflow,
    #[error("Duplicate rule name: '{0}'")]
    DuplicateRuleName(String),
    #[error("Rule has empty or whitespace-only name")]
    EmptyRuleName,
    #[error("Rule '{0}' has no shell command specified")]
    EmptyShell(String),
    #[error("Rule '{0}' declares no output")]
    NoOutput(String),
    #[error("Rule '{rule}': wildcard '{{{wildcard}}}' is not defined by any output")]
    UnboundWildcard { rule: String, wildcard: String },
    #[error("Rule '{rule}': output '{output}' does not use every wildcard of the rule")]
    PartialOutputWildcards { rule: String, output: String },
    #[error("Rule '{rule}': {message}")]
    Template { rule: String, message: String },
    #[error("Wildcard constraint for '{wildcard}' is not a valid regex: {message}")]
    InvalidConstraint { wildcard: String, message: String },
}

/// Validates a single rule's fields.
fn validate_rule(rule: &Rule, workflow: &Workflow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Check name
    if rule.name.trim().is_empty() {
        errors.push(ValidationError::EmptyRuleName);
        return errors; // Can't validate further without a name
    }

    if rule.shell.trim().is_empty() {
        errors.push(ValidationError::EmptyShell(rule.name.clone()));
    }

    if rule.output.is_empty() {
        errors.push(ValidationError::NoOutput(rule.name.clone()));
    }

    for wildcard in rule.unbound_wildcards() {
        errors.push(ValidationError::UnboundWildcard {
            rule: rule.name.clone(),
            wildcard,
        });
    }

    // Every output binds the full wildcard set.
    let wildcard_names: BTreeSet<String> = rule.wildcard_names().into_iter().collect();
    for output in &rule.output {
        let names: BTreeSet<String> = extract_wildcard_names(output).into_iter().collect();
        if names != wildcard_names {
            errors.push(ValidationError::PartialOutputWildcards {
                rule: rule.name.clone(),
                output: output.clone(),
            });
        }
    }

    if let Err(e) = check_templates(rule, workflow) {
        errors.push(ValidationError::Template {
            rule: rule.name.clone(),
            message: e.to_string(),
        });
    }

    // Warn about placeholder mismatches
    if rule.shell.contains("{input}") && rule.input.is_empty() {
        warn!(
            "Rule '{}': shell uses {{input}} but no input specified",
            rule.name
        );
    }

    if rule.input.is_empty() {
        debug!("Rule '{}' has no inputs", rule.name);
    }

    errors
}

/// Renders params and shell with placeholder values to catch unknown
/// placeholders and unset config keys before any job is built.
fn check_templates(rule: &Rule, workflow: &Workflow) -> Result<()> {
    let wildcards: Wildcards = rule
        .wildcard_names()
        .into_iter()
        .map(|name| (name.clone(), name))
        .collect();

    let params_ctx = TemplateContext::new(&rule.name, workflow, &wildcards);
    let mut params = BTreeMap::new();
    for (key, template) in &rule.params {
        params.insert(key.clone(), params_ctx.render(template)?);
    }

    let shell_ctx = TemplateContext {
        input: Some(rule.input.as_slice()),
        output: Some(rule.output.as_slice()),
        params: Some(&params),
        log: rule.log.as_deref(),
        threads: Some(rule.threads),
        ..TemplateContext::new(&rule.name, workflow, &wildcards)
    };
    shell_ctx.render(&rule.shell)?;
    Ok(())
}

/// Collects every validation error in the workflow without failing early.
pub fn collect_errors(workflow: &Workflow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if workflow.rules.is_empty() {
        errors.push(ValidationError::EmptyWorkflow);
        return errors;
    }

    let mut seen_names: HashSet<&str> = HashSet::new();
    for rule in &workflow.rules {
        if !rule.name.trim().is_empty() && !seen_names.insert(rule.name.as_str()) {
            errors.push(ValidationError::DuplicateRuleName(rule.name.clone()));
        }
        errors.extend(validate_rule(rule, workflow));
    }

    for (wildcard, constraint) in &workflow.wildcard_constraints {
        if let Err(e) = PatternMatcher::new(&format!("{{{}}}", wildcard), &workflow.wildcard_constraints) {
            errors.push(ValidationError::InvalidConstraint {
                wildcard: wildcard.clone(),
                message: format!("'{}': {}", constraint, e),
            });
        }
    }

    errors
}

/// Validates the entire workflow structure.
///
/// Performs the following checks:
/// 1. Workflow is not empty
/// 2. No duplicate rule names
/// 3. All rules have a name, a shell command and at least one output
/// 4. Wildcards in inputs and log are bound by the outputs
/// 5. Templates only use known placeholders and set config keys
/// 6. Wildcard constraints compile
pub fn validate_workflow(workflow: &Workflow) -> Result<()> {
    info!("Validating workflow with {} rules", workflow.rules.len());

    let errors = collect_errors(workflow);
    if !errors.is_empty() {
        return Err(Error::Validation(
            errors.iter().map(|e| e.to_string()).collect(),
        ));
    }

    info!("Workflow validated: {} rules", workflow.rules.len());
    Ok(())
}
