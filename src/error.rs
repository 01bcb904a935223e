//! Error Types
//!
//! A single error enum shared by the workflow, execution, environment and
//! project modules.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading, resolving or running a workflow.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid wildcard pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Workflow validation failed:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    #[error("Config key '{key}' is not set (required by rule '{rule}')")]
    MissingConfig { rule: String, key: String },

    #[error("Wildcard '{{{name}}}' in '{pattern}' has no value")]
    UnboundWildcard { pattern: String, name: String },

    #[error("Rule '{rule}': unknown placeholder '{{{placeholder}}}'")]
    UnknownPlaceholder { rule: String, placeholder: String },

    #[error("Missing input file '{path}'{}", required_by_suffix(.rule))]
    MissingInput { path: String, rule: Option<String> },

    #[error("Ambiguous target '{path}': produced by rules {}", .rules.join(", "))]
    AmbiguousRule { path: String, rules: Vec<String> },

    #[error("Cyclic dependency detected while resolving '{path}'")]
    CyclicDependency { path: String },

    #[error(
        "Rule '{rule}' requires its own output again with a longer '{{{wildcard}}}' while resolving '{path}'"
    )]
    PeriodicWildcard {
        rule: String,
        wildcard: String,
        path: String,
    },

    #[error("Dependency chain deeper than {depth} jobs while resolving '{path}'")]
    DependencyTooDeep { path: String, depth: usize },

    #[error("No targets given and the first rule has wildcards in its output")]
    NoTargets,

    #[error("Job '{job}' failed with exit code {}{}", code_text(.code), log_suffix(.log))]
    JobFailed {
        job: String,
        code: Option<i32>,
        log: Option<String>,
    },

    #[error("Job '{job}' finished but did not produce '{path}'")]
    MissingOutput { job: String, path: String },

    #[error("Conda environment error: {0}")]
    Conda(String),

    #[error("Project error: {0}")]
    Project(String),
}

impl Error {
    /// Wraps an `io::Error` with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn required_by_suffix(rule: &Option<String>) -> String {
    match rule {
        Some(rule) => format!(" (required by rule '{}')", rule),
        None => " (no rule produces it)".to_string(),
    }
}

fn code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

fn log_suffix(log: &Option<String>) -> String {
    match log {
        Some(log) => format!(". See log: {}", log),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_display() {
        let err = Error::MissingInput {
            path: "ontologies/hic_ontology.py".to_string(),
            rule: Some("create_ontology_dataframe".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("ontologies/hic_ontology.py"));
        assert!(text.contains("create_ontology_dataframe"));

        let err = Error::MissingInput {
            path: "x.txt".to_string(),
            rule: None,
        };
        assert!(err.to_string().contains("no rule produces it"));
    }

    #[test]
    fn test_job_failed_display() {
        let err = Error::JobFailed {
            job: "convert[ontology_name=hic]".to_string(),
            code: Some(2),
            log: Some("logs/hic.log".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("exit code 2"));
        assert!(text.contains("logs/hic.log"));

        let err = Error::JobFailed {
            job: "x".to_string(),
            code: None,
            log: None,
        };
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_validation_display_joins_lines() {
        let err = Error::Validation(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(err.to_string(), "Workflow validation failed:\nfirst\nsecond");
    }

    #[test]
    fn test_periodic_wildcard_display() {
        let err = Error::PeriodicWildcard {
            rule: "grow".to_string(),
            wildcard: "x".to_string(),
            path: "ax.txt".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Rule 'grow' requires its own output again with a longer '{x}' while resolving 'ax.txt'"
        );
    }

    #[test]
    fn test_unknown_placeholder_display() {
        let err = Error::UnknownPlaceholder {
            rule: "r".to_string(),
            placeholder: "foo".to_string(),
        };
        assert_eq!(err.to_string(), "Rule 'r': unknown placeholder '{foo}'");
    }
}
