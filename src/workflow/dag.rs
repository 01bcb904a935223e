//! Job Graph Resolution
//!
//! Turns requested targets into concrete jobs. Each target path is matched
//! against the output patterns of every rule; the matching rule is
//! instantiated with the recovered wildcards, and its inputs are resolved
//! the same way. Inputs no rule produces must already exist on disk.
//!
//! Resolution finishes before any command runs, so a missing source file
//! fails the whole request without producing outputs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use log::{debug, info};
use serde::Serialize;

use super::model::{NamedPath, Rule, Workflow};
use super::template::TemplateContext;
use super::wildcards::{substitute_wildcards, PatternMatcher, Wildcards};
use crate::error::{Error, Result};

/// One instantiation of a rule for one wildcard binding.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Job {
    /// `rule[key=value,...]`, or the rule name when it has no wildcards
    pub id: String,
    pub rule: String,
    pub wildcards: Wildcards,
    pub input: Vec<NamedPath>,
    pub output: Vec<String>,
    pub params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conda: Option<String>,
    /// Fully rendered shell command
    pub command: String,
    pub threads: usize,
    /// IDs of jobs producing this job's inputs
    pub dependencies: Vec<String>,
}

/// Builds the job ID from a rule name and its wildcard binding.
pub fn job_id(rule: &str, wildcards: &Wildcards) -> String {
    if wildcards.is_empty() {
        return rule.to_string();
    }
    let binding: Vec<String> = wildcards
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{}[{}]", rule, binding.join(","))
}

/// Longest dependency chain resolution will follow.
pub const MAX_RESOLVE_DEPTH: usize = 256;

/// Strips a leading `./` so equivalent relative paths compare equal.
fn normalize_path(path: &str) -> String {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.to_string()
}

fn modified_time(path: &str) -> Option<SystemTime> {
    fs::metadata(path).ok()?.modified().ok()
}

impl Job {
    /// Checks if all output files exist.
    pub fn outputs_exist(&self) -> bool {
        !self.output.is_empty() && self.output.iter().all(|f| Path::new(f).exists())
    }

    /// Checks if outputs are outdated compared to inputs.
    ///
    /// Returns true if any input is newer than the oldest output, or if
    /// outputs don't exist.
    pub fn outputs_outdated(&self) -> bool {
        if !self.outputs_exist() {
            return true;
        }

        let newest_input = self
            .input
            .iter()
            .filter_map(|i| modified_time(&i.path))
            .max();

        let oldest_output = self.output.iter().filter_map(|o| modified_time(o)).min();

        match (newest_input, oldest_output) {
            (Some(input_time), Some(output_time)) => input_time > output_time,
            (None, Some(_)) => false,
            _ => true,
        }
    }

    /// Input paths, in declaration order.
    pub fn input_paths(&self) -> Vec<&str> {
        self.input.iter().map(|i| i.path.as_str()).collect()
    }
}

/// Instantiates a rule for one wildcard binding.
///
/// Every field is substituted from the same binding map, so a wildcard
/// resolves to the same value in inputs, outputs and log.
pub fn instantiate_rule(workflow: &Workflow, rule: &Rule, wildcards: Wildcards) -> Result<Job> {
    let output = rule
        .output
        .iter()
        .map(|o| substitute_wildcards(o, &wildcards).map(|p| normalize_path(&p)))
        .collect::<Result<Vec<_>>>()?;

    let input = rule
        .input
        .iter()
        .map(|i| {
            substitute_wildcards(&i.path, &wildcards).map(|path| NamedPath {
                name: i.name.clone(),
                path: normalize_path(&path),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let log = rule
        .log
        .as_deref()
        .map(|l| substitute_wildcards(l, &wildcards))
        .transpose()?;

    let params_ctx = TemplateContext::new(&rule.name, workflow, &wildcards);
    let mut params = BTreeMap::new();
    for (key, template) in &rule.params {
        params.insert(key.clone(), params_ctx.render(template)?);
    }

    let threads = rule.threads.max(1);
    let command = TemplateContext {
        input: Some(input.as_slice()),
        output: Some(output.as_slice()),
        params: Some(&params),
        log: log.as_deref(),
        threads: Some(threads),
        ..TemplateContext::new(&rule.name, workflow, &wildcards)
    }
    .render(&rule.shell)?;

    Ok(Job {
        id: job_id(&rule.name, &wildcards),
        rule: rule.name.clone(),
        wildcards,
        input,
        output,
        params,
        log,
        conda: rule.conda.clone(),
        command,
        threads,
        dependencies: Vec::new(),
    })
}

/// Expands requested targets into file paths.
///
/// Precedence: explicit targets, then the workflow's `targets`, then the
/// outputs of the first rule. A target naming a wildcard-free rule stands
/// for that rule's outputs.
pub fn resolve_targets(workflow: &Workflow, requested: &[String]) -> Result<Vec<String>> {
    let requested = if !requested.is_empty() {
        requested
    } else if !workflow.targets.is_empty() {
        &workflow.targets[..]
    } else {
        let first = workflow.rules.first().ok_or(Error::NoTargets)?;
        if first.has_wildcards() {
            return Err(Error::NoTargets);
        }
        info!("No targets given, using outputs of first rule '{}'", first.name);
        return Ok(first.output.iter().map(|o| normalize_path(o)).collect());
    };

    let mut targets = Vec::new();
    for target in requested {
        match workflow.get_rule(target) {
            Some(rule) if !rule.has_wildcards() => {
                debug!("Target '{}' names rule, expanding to its outputs", target);
                targets.extend(rule.output.iter().map(|o| normalize_path(o)));
            }
            _ => targets.push(normalize_path(target)),
        }
    }
    Ok(targets)
}

/// Resolved set of jobs in topological order.
#[derive(Serialize, Debug, Clone, Default)]
pub struct JobGraph {
    /// Target paths the graph was built for
    pub targets: Vec<String>,
    /// Jobs ordered so dependencies precede dependents
    pub jobs: Vec<Job>,
}

impl JobGraph {
    /// Builds the job graph needed to produce `requested` targets.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use ont_rdb::workflow::{load_workflow, JobGraph};
    ///
    /// fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let workflow = load_workflow("workflow.yaml", &[])?;
    ///     let targets = vec!["ontology_dataframes/hic_ontology_dataframe.pkl".to_string()];
    ///     let graph = JobGraph::build(&workflow, &targets)?;
    ///     for job in &graph.jobs {
    ///         println!("{}: {}", job.id, job.command);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn build(workflow: &Workflow, requested: &[String]) -> Result<Self> {
        let targets = resolve_targets(workflow, requested)?;
        let mut resolver = Resolver::new(workflow)?;

        for target in &targets {
            resolver.resolve_path(target, None)?;
        }

        info!(
            "Resolved {} target(s) into {} job(s)",
            targets.len(),
            resolver.jobs.len()
        );

        Ok(Self {
            targets,
            jobs: resolver.jobs,
        })
    }

    /// Gets a job by ID.
    pub fn get_job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Returns the IDs of jobs that must run.
    ///
    /// A job runs if forced, if its outputs are missing or older than its
    /// inputs, or if any of its dependencies runs.
    pub fn jobs_to_run(&self, force: bool) -> HashSet<String> {
        let mut to_run = HashSet::new();

        for job in &self.jobs {
            let reason = if force {
                Some("forced")
            } else if !job.outputs_exist() {
                Some("missing output")
            } else if job.outputs_outdated() {
                Some("input newer than output")
            } else if job.dependencies.iter().any(|d| to_run.contains(d)) {
                Some("dependency will run")
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    debug!("Job '{}' will run: {}", job.id, reason);
                    to_run.insert(job.id.clone());
                }
                None => debug!("Job '{}' is up to date", job.id),
            }
        }

        to_run
    }

    /// Returns the number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if there are no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Depth-first resolution state.
struct Resolver<'a> {
    workflow: &'a Workflow,
    matchers: Vec<(&'a Rule, Vec<PatternMatcher>)>,
    jobs: Vec<Job>,
    /// Output path -> producing job ID
    producers: HashMap<String, String>,
    /// Jobs on the current resolution path
    visiting: HashSet<String>,
    /// Rule and wildcards of each job on the current resolution path
    ancestors: Vec<(String, Wildcards)>,
}

impl<'a> Resolver<'a> {
    fn new(workflow: &'a Workflow) -> Result<Self> {
        let matchers = workflow
            .rules
            .iter()
            .map(|rule| {
                rule.output
                    .iter()
                    .map(|o| PatternMatcher::new(&normalize_path(o), &workflow.wildcard_constraints))
                    .collect::<Result<Vec<_>>>()
                    .map(|m| (rule, m))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            workflow,
            matchers,
            jobs: Vec::new(),
            producers: HashMap::new(),
            visiting: HashSet::new(),
            ancestors: Vec::new(),
        })
    }

    /// Finds the single rule able to produce `path`.
    fn find_producer(&self, path: &str) -> Result<Option<(&'a Rule, Wildcards)>> {
        let candidates: Vec<(&'a Rule, Wildcards)> = self
            .matchers
            .iter()
            .filter_map(|(rule, matchers)| {
                matchers
                    .iter()
                    .find_map(|m| m.matches(path))
                    .map(|wildcards| (*rule, wildcards))
            })
            .collect();

        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.into_iter().next()),
            _ => Err(Error::AmbiguousRule {
                path: path.to_string(),
                rules: candidates.iter().map(|(r, _)| r.name.clone()).collect(),
            }),
        }
    }

    /// Finds a wildcard that grew since the same rule was entered higher up
    /// the current path, e.g. `{x}` bound to `a` and then to `ax`.
    fn periodic_wildcard(&self, job: &Job) -> Option<String> {
        self.ancestors
            .iter()
            .filter(|(rule, _)| *rule == job.rule)
            .find_map(|(_, earlier)| {
                job.wildcards.iter().find_map(|(name, value)| match earlier.get(name) {
                    Some(old) if old != value && value.contains(old.as_str()) => Some(name.clone()),
                    _ => None,
                })
            })
    }

    /// Resolves a path, returning the ID of the job producing it
    /// (or `None` for an existing source file).
    fn resolve_path(&mut self, path: &str, required_by: Option<&str>) -> Result<Option<String>> {
        if let Some(id) = self.producers.get(path) {
            return Ok(Some(id.clone()));
        }

        let Some((rule, wildcards)) = self.find_producer(path)? else {
            if Path::new(path).exists() {
                debug!("'{}' is a source file", path);
                return Ok(None);
            }
            return Err(Error::MissingInput {
                path: path.to_string(),
                rule: required_by.map(str::to_string),
            });
        };

        let mut job = instantiate_rule(self.workflow, rule, wildcards)?;

        if self.visiting.contains(&job.id) {
            return Err(Error::CyclicDependency {
                path: path.to_string(),
            });
        }
        if self.jobs.iter().any(|j| j.id == job.id) {
            self.producers.insert(path.to_string(), job.id.clone());
            return Ok(Some(job.id));
        }
        if let Some(wildcard) = self.periodic_wildcard(&job) {
            return Err(Error::PeriodicWildcard {
                rule: job.rule,
                wildcard,
                path: path.to_string(),
            });
        }
        if self.ancestors.len() >= MAX_RESOLVE_DEPTH {
            return Err(Error::DependencyTooDeep {
                path: path.to_string(),
                depth: MAX_RESOLVE_DEPTH,
            });
        }

        self.visiting.insert(job.id.clone());
        self.ancestors.push((job.rule.clone(), job.wildcards.clone()));

        let mut dependencies = Vec::new();
        for input in job.input_paths() {
            if let Some(dep) = self.resolve_path(input, Some(job.rule.as_str()))? {
                if !dependencies.contains(&dep) {
                    dependencies.push(dep);
                }
            }
        }
        job.dependencies = dependencies;

        self.ancestors.pop();
        self.visiting.remove(&job.id);

        debug!(
            "Job '{}' input={:?} output={:?} deps={:?}",
            job.id,
            job.input_paths(),
            job.output,
            job.dependencies
        );

        for output in &job.output {
            self.producers.insert(output.clone(), job.id.clone());
        }
        self.producers.insert(path.to_string(), job.id.clone());

        let id = job.id.clone();
        self.jobs.push(job);
        Ok(Some(id))
    }
}
