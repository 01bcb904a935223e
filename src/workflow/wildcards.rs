//! Wildcard Pattern Matching and Substitution
//!
//! A pattern such as `ontologies/{ontology_name}_ontology.py` names its
//! wildcards in braces. Matching a concrete path against a pattern yields
//! a binding map; substituting a binding map into a pattern yields a path.
//!
//! Every occurrence of a wildcard within one instantiation must resolve to
//! the same text. Repeated occurrences are captured separately while
//! matching and compared afterwards, since the regex engine has no
//! backreferences.

use std::collections::BTreeMap;

use log::debug;
use regex::Regex;

use crate::error::{Error, Result};

/// Concrete wildcard values for one rule instantiation.
pub type Wildcards = BTreeMap<String, String>;

/// Regex a wildcard matches when no constraint is configured.
pub const DEFAULT_WILDCARD_REGEX: &str = ".+";

/// Checks if a string contains wildcard syntax.
pub fn has_wildcards(text: &str) -> bool {
    !extract_wildcard_names(text).is_empty()
}

/// Returns true for names usable as wildcards (`[A-Za-z_][A-Za-z0-9_]*`).
fn is_wildcard_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A parsed piece of a pattern.
#[derive(Debug, Clone, PartialEq)]
enum Segment<'a> {
    Literal(String),
    Wildcard(&'a str),
}

/// Splits a pattern into literal text and wildcard references.
///
/// `{{` and `}}` are literal braces. Brace groups that do not hold a valid
/// wildcard name stay literal.
fn segments(pattern: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut literal = String::new();
    let bytes = pattern.as_bytes();
    let mut i = 0;

    while i < pattern.len() {
        let rest = &pattern[i..];
        if rest.starts_with("{{") || rest.starts_with("}}") {
            literal.push(bytes[i] as char);
            i += 2;
            continue;
        }
        if bytes[i] == b'{' {
            if let Some(end) = rest.find('}') {
                let name = &rest[1..end];
                if is_wildcard_name(name) {
                    if !literal.is_empty() {
                        out.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    out.push(Segment::Wildcard(name));
                    i += end + 1;
                    continue;
                }
            }
        }
        let ch = rest.chars().next().unwrap_or_default();
        literal.push(ch);
        i += ch.len_utf8();
    }

    if !literal.is_empty() {
        out.push(Segment::Literal(literal));
    }
    out
}

/// Extracts wildcard names from a pattern, in order of appearance.
///
/// # Example
/// ```
/// use ont_rdb::workflow::wildcards::extract_wildcard_names;
///
/// let names = extract_wildcard_names("ontologies/{ontology_name}_ontology.py");
/// assert_eq!(names, vec!["ontology_name"]);
/// ```
pub fn extract_wildcard_names(pattern: &str) -> Vec<String> {
    segments(pattern)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Wildcard(name) => Some(name.to_string()),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// A compiled output pattern that can recover wildcard values from paths.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    regex: Regex,
    /// Wildcard name for each capture group, in group order
    groups: Vec<String>,
}

impl PatternMatcher {
    /// Compiles a pattern, using `constraints` to restrict what each
    /// wildcard may match.
    pub fn new(pattern: &str, constraints: &BTreeMap<String, String>) -> Result<Self> {
        let mut regex = String::from("^");
        let mut groups = Vec::new();

        for segment in segments(pattern) {
            match segment {
                Segment::Literal(text) => regex.push_str(&regex::escape(&text)),
                Segment::Wildcard(name) => {
                    let constraint = constraints
                        .get(name)
                        .map(String::as_str)
                        .unwrap_or(DEFAULT_WILDCARD_REGEX);
                    regex.push_str(&format!("(?P<w{}>{})", groups.len(), constraint));
                    groups.push(name.to_string());
                }
            }
        }
        regex.push('$');

        debug!("Compiled pattern '{}' to /{}/", pattern, regex);

        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&regex)?,
            groups,
        })
    }

    /// The pattern this matcher was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Matches a concrete path, returning the wildcard binding.
    ///
    /// Returns `None` if the path doesn't match or if a repeated wildcard
    /// captured different text at different positions.
    pub fn matches(&self, path: &str) -> Option<Wildcards> {
        let captures = self.regex.captures(path)?;
        let mut wildcards = Wildcards::new();

        for (index, name) in self.groups.iter().enumerate() {
            let value = captures.name(&format!("w{}", index))?.as_str();
            match wildcards.get(name) {
                Some(existing) if existing != value => {
                    debug!(
                        "Path '{}' binds '{{{}}}' inconsistently ('{}' vs '{}')",
                        path, name, existing, value
                    );
                    return None;
                }
                Some(_) => {}
                None => {
                    wildcards.insert(name.clone(), value.to_string());
                }
            }
        }

        Some(wildcards)
    }
}

/// Substitutes every wildcard in a pattern with its bound value.
///
/// # Example
/// ```
/// use ont_rdb::workflow::wildcards::{substitute_wildcards, Wildcards};
///
/// let mut wildcards = Wildcards::new();
/// wildcards.insert("ontology_name".to_string(), "hic".to_string());
///
/// let path = substitute_wildcards("logs/{ontology_name}.log", &wildcards).unwrap();
/// assert_eq!(path, "logs/hic.log");
/// ```
pub fn substitute_wildcards(pattern: &str, wildcards: &Wildcards) -> Result<String> {
    let mut out = String::with_capacity(pattern.len());
    for segment in segments(pattern) {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Wildcard(name) => {
                let value = wildcards.get(name).ok_or_else(|| Error::UnboundWildcard {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}
