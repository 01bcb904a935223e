//! Workflow Data Model
//!
//! Core data structures representing build rules and the workflow file
//! that declares them.
//!
//! # Example YAML Format
//!
//! ```yaml
//! config:
//!   informant_class_path: informant_class.py
//!
//! rules:
//!   - name: create_ontology_dataframe
//!     input:
//!       ontology_script: ontologies/{ontology_name}_ontology.py
//!     output: ontology_dataframes/{ontology_name}_ontology_dataframe.pkl
//!     params:
//!       informant_class_path: "{config.informant_class_path}"
//!     log: logs/{ontology_name}.log
//!     conda: envs/environment.yaml
//!     shell: >-
//!       python3 create_ontology_dataframe.py
//!       --inf {params.informant_class_path:q}
//!       --ont {input.ontology_script:q}
//!       --o {output:q}
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::workflow::wildcards::extract_wildcard_names;

/// A single input path, optionally named so templates can refer to it
/// as `{input.NAME}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NamedPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub path: String,
}

impl NamedPath {
    /// Creates a named path.
    pub fn named(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            path: path.into(),
        }
    }

    /// Creates an unnamed (positional) path.
    pub fn positional(path: impl Into<String>) -> Self {
        Self {
            name: None,
            path: path.into(),
        }
    }
}

/// A declarative build rule.
///
/// Paths may contain `{wildcard}` placeholders; the rule is instantiated
/// once per distinct wildcard binding requested by a target.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Rule {
    /// Unique rule name
    pub name: String,

    /// Input patterns (a string, a list, or a name -> pattern mapping)
    #[serde(deserialize_with = "single_list_or_map", default)]
    pub input: Vec<NamedPath>,

    /// Output patterns
    #[serde(deserialize_with = "single_or_vec", default)]
    pub output: Vec<String>,

    /// Parameters passed to the command, rendered before the shell template
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Log file receiving combined stdout/stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,

    /// Conda environment descriptor file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conda: Option<String>,

    /// Shell command template
    pub shell: String,

    /// Number of threads/cores this rule requires
    #[serde(default = "default_threads")]
    pub threads: usize,
}

/// Default thread count for rules that don't specify
fn default_threads() -> usize {
    1
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

/// Deserializes a string, an array of strings, or an ordered mapping of
/// names to strings into a list of named paths.
fn single_list_or_map<'de, D>(deserializer: D) -> Result<Vec<NamedPath>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Mapping(map) => map
            .into_iter()
            .map(|(k, v)| match (k, v) {
                (Value::String(name), Value::String(path)) => Ok(NamedPath::named(name, path)),
                _ => Err(de::Error::custom("Expected string keys and string values in input mapping")),
            })
            .collect(),
        other => single_or_vec(other)
            .map(|paths| paths.into_iter().map(NamedPath::positional).collect())
            .map_err(de::Error::custom),
    }
}

impl Rule {
    /// Creates a new Rule with a name and shell template.
    ///
    /// # Example
    ///
    /// ```
    /// use ont_rdb::workflow::Rule;
    ///
    /// let rule = Rule::new("convert", "python3 convert.py {input} > {output}")
    ///     .with_named_input("script", "ontologies/{name}_ontology.py")
    ///     .with_output("out/{name}.pkl")
    ///     .with_log("logs/{name}.log");
    /// assert_eq!(rule.wildcard_names(), vec!["name"]);
    /// ```
    pub fn new(name: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            input: Vec::new(),
            output: Vec::new(),
            params: BTreeMap::new(),
            log: None,
            conda: None,
            shell: shell.into().trim().to_string(),
            threads: 1,
        }
    }

    /// Adds a positional input pattern.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input.push(NamedPath::positional(input));
        self
    }

    /// Adds a named input pattern.
    pub fn with_named_input(mut self, name: impl Into<String>, input: impl Into<String>) -> Self {
        self.input.push(NamedPath::named(name, input));
        self
    }

    /// Adds an output pattern.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output.push(output.into());
        self
    }

    /// Sets a parameter template.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Sets the log pattern.
    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    /// Sets the conda environment descriptor.
    pub fn with_conda(mut self, conda: impl Into<String>) -> Self {
        self.conda = Some(conda.into());
        self
    }

    /// Sets the thread count for this rule.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Wildcard names appearing in the output patterns, sorted and deduplicated.
    ///
    /// Outputs determine the binding, so these are the wildcards a
    /// target path can supply.
    pub fn wildcard_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .output
            .iter()
            .flat_map(|o| extract_wildcard_names(o))
            .collect();
        names.into_iter().collect()
    }

    /// Wildcard names used by inputs and log that no output defines.
    pub fn unbound_wildcards(&self) -> Vec<String> {
        let bound: BTreeSet<String> = self.wildcard_names().into_iter().collect();
        let used: BTreeSet<String> = self
            .input
            .iter()
            .map(|i| i.path.as_str())
            .chain(self.log.as_deref())
            .flat_map(extract_wildcard_names)
            .collect();
        used.difference(&bound).cloned().collect()
    }

    /// Returns true if any output contains a wildcard.
    pub fn has_wildcards(&self) -> bool {
        !self.wildcard_names().is_empty()
    }
}

/// A complete workflow: configuration plus the rules that act on it.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Workflow {
    /// Values referenced by templates as `{config.KEY}`
    #[serde(default)]
    pub config: BTreeMap<String, Value>,

    /// Regex restricting what a wildcard may match (default `.+`)
    #[serde(default)]
    pub wildcard_constraints: BTreeMap<String, String>,

    /// Rules in declaration order
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Default targets when none are given on the command line
    #[serde(default, deserialize_with = "single_or_vec")]
    pub targets: Vec<String>,
}

impl Workflow {
    /// Creates a new empty workflow.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a workflow from a list of rules.
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    /// Adds a rule to the workflow.
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), String> {
        if self.rules.iter().any(|r| r.name == rule.name) {
            return Err(format!("Rule '{}' already exists", rule.name));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Gets a rule by name.
    pub fn get_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Sets a config value, overriding whatever the file declared.
    pub fn set_config(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), Value::String(value.into()));
    }

    /// Returns a config value rendered as text.
    ///
    /// Only scalars can be rendered; sequences and mappings yield `None`.
    pub fn config_value(&self, key: &str) -> Option<String> {
        match self.config.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Returns the number of rules in the workflow.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the workflow has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
