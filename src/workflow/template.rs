//! Template Rendering
//!
//! Renders params and shell templates for one rule instantiation.
//!
//! Supported placeholders:
//! - `{input}` / `{output}` - Space-separated input/output files
//! - `{input.NAME}` / `{input.N}` - A named or positional input
//! - `{output.N}` - A positional output
//! - `{params.KEY}`, `{wildcards.NAME}`, `{config.KEY}`
//! - `{log}`, `{threads}`
//!
//! Appending `:q` (`{input.ontology_script:q}`) shell-quotes each value.
//! `{{` and `}}` produce literal braces. Any other placeholder is an error.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::workflow::model::{NamedPath, Workflow};
use crate::workflow::wildcards::Wildcards;

/// Values a template may refer to.
///
/// Fields left as `None` are not available to the template, so
/// referring to them is an error.
pub struct TemplateContext<'a> {
    pub rule: &'a str,
    pub workflow: &'a Workflow,
    pub wildcards: &'a Wildcards,
    pub input: Option<&'a [NamedPath]>,
    pub output: Option<&'a [String]>,
    pub params: Option<&'a BTreeMap<String, String>>,
    pub log: Option<&'a str>,
    pub threads: Option<usize>,
}

impl<'a> TemplateContext<'a> {
    /// A context exposing only wildcards and config, used for params.
    pub fn new(rule: &'a str, workflow: &'a Workflow, wildcards: &'a Wildcards) -> Self {
        Self {
            rule,
            workflow,
            wildcards,
            input: None,
            output: None,
            params: None,
            log: None,
            threads: None,
        }
    }

    /// Renders a template, substituting every placeholder.
    pub fn render(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
            } else if tail.starts_with('{') {
                let end = tail.find('}').ok_or_else(|| self.unknown(tail))?;
                out.push_str(&self.resolve(&tail[1..end])?);
                rest = &tail[end + 1..];
            } else {
                // Lone closing brace
                out.push('}');
                rest = &tail[1..];
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    fn unknown(&self, placeholder: &str) -> Error {
        Error::UnknownPlaceholder {
            rule: self.rule.to_string(),
            placeholder: placeholder.to_string(),
        }
    }

    fn resolve(&self, placeholder: &str) -> Result<String> {
        let (name, quoted) = match placeholder.strip_suffix(":q") {
            Some(name) => (name, true),
            None => (placeholder, false),
        };
        let (namespace, key) = match name.split_once('.') {
            Some((ns, key)) => (ns, Some(key)),
            None => (name, None),
        };

        let values: Option<Vec<String>> = match (namespace, key) {
            ("input", None) => self
                .input
                .map(|paths| paths.iter().map(|p| p.path.clone()).collect()),
            ("input", Some(key)) => self.input.and_then(|paths| {
                paths
                    .iter()
                    .find(|p| p.name.as_deref() == Some(key))
                    .or_else(|| key.parse::<usize>().ok().and_then(|i| paths.get(i)))
                    .map(|p| vec![p.path.clone()])
            }),
            ("output", None) => self.output.map(<[String]>::to_vec),
            ("output", Some(key)) => self
                .output
                .and_then(|paths| key.parse::<usize>().ok().and_then(|i| paths.get(i)))
                .map(|p| vec![p.clone()]),
            ("params", Some(key)) => self
                .params
                .and_then(|p| p.get(key))
                .map(|v| vec![v.clone()]),
            ("wildcards", Some(key)) => self.wildcards.get(key).map(|v| vec![v.clone()]),
            ("log", None) => self.log.map(|l| vec![l.to_string()]),
            ("threads", None) => self.threads.map(|t| vec![t.to_string()]),
            ("config", Some(key)) => {
                let value = self
                    .workflow
                    .config_value(key)
                    .ok_or_else(|| Error::MissingConfig {
                        rule: self.rule.to_string(),
                        key: key.to_string(),
                    })?;
                Some(vec![value])
            }
            _ => None,
        };

        let values = values.ok_or_else(|| self.unknown(placeholder))?;
        if quoted {
            Ok(values
                .iter()
                .map(|v| shell_words::quote(v))
                .collect::<Vec<_>>()
                .join(" "))
        } else {
            Ok(values.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn workflow() -> Workflow {
        let mut workflow = Workflow::new();
        workflow.set_config("informant_class_path", "informant_class.py");
        workflow
    }

    fn wildcards() -> Wildcards {
        let mut w = Wildcards::new();
        w.insert("ontology_name".to_string(), "hic".to_string());
        w
    }

    #[test]
    fn test_render_params_from_config_and_wildcards() {
        let workflow = workflow();
        let wildcards = wildcards();
        let ctx = TemplateContext::new("r", &workflow, &wildcards);

        assert_eq!(
            ctx.render("{config.informant_class_path}").unwrap(),
            "informant_class.py"
        );
        assert_eq!(ctx.render("name={wildcards.ontology_name}").unwrap(), "name=hic");
    }

    #[test]
    fn test_render_params_context_rejects_input() {
        let workflow = workflow();
        let wildcards = wildcards();
        let ctx = TemplateContext::new("r", &workflow, &wildcards);

        assert!(matches!(
            ctx.render("{input}"),
            Err(Error::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn test_render_missing_config() {
        let workflow = Workflow::new();
        let wildcards = Wildcards::new();
        let ctx = TemplateContext::new("convert", &workflow, &wildcards);

        match ctx.render("{config.informant_class_path}") {
            Err(Error::MissingConfig { rule, key }) => {
                assert_eq!(rule, "convert");
                assert_eq!(key, "informant_class_path");
            }
            other => panic!("expected MissingConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_render_shell_namespaces() {
        let workflow = workflow();
        let wildcards = wildcards();
        let input = vec![
            NamedPath::named("ontology_script", "ontologies/hic_ontology.py"),
            NamedPath::positional("extra.txt"),
        ];
        let output = vec!["a.pkl".to_string(), "b.pkl".to_string()];
        let mut params = BTreeMap::new();
        params.insert("informant_class_path".to_string(), "inf.py".to_string());

        let ctx = TemplateContext {
            input: Some(input.as_slice()),
            output: Some(output.as_slice()),
            params: Some(&params),
            log: Some("logs/hic.log"),
            threads: Some(2),
            ..TemplateContext::new("r", &workflow, &wildcards)
        };

        assert_eq!(
            ctx.render("{input.ontology_script}|{input.1}|{input}").unwrap(),
            "ontologies/hic_ontology.py|extra.txt|ontologies/hic_ontology.py extra.txt"
        );
        assert_eq!(ctx.render("{output}|{output.1}").unwrap(), "a.pkl b.pkl|b.pkl");
        assert_eq!(ctx.render("{params.informant_class_path}").unwrap(), "inf.py");
        assert_eq!(ctx.render("{log} -t {threads}").unwrap(), "logs/hic.log -t 2");
    }

    #[test]
    fn test_render_quoted_values() {
        let workflow = workflow();
        let mut wildcards = Wildcards::new();
        wildcards.insert("ontology_name".to_string(), "my onto".to_string());
        let input = vec![NamedPath::named("ontology_script", "ontologies/my onto_ontology.py")];
        let output = vec!["plain.pkl".to_string(), "it's.pkl".to_string()];

        let ctx = TemplateContext {
            input: Some(input.as_slice()),
            output: Some(output.as_slice()),
            ..TemplateContext::new("r", &workflow, &wildcards)
        };

        assert_eq!(
            ctx.render("{input.ontology_script:q}").unwrap(),
            "'ontologies/my onto_ontology.py'"
        );
        let rendered = ctx.render("{output:q}").unwrap();
        assert_eq!(
            shell_words::split(&rendered).unwrap(),
            vec!["plain.pkl", "it's.pkl"]
        );
        assert_eq!(ctx.render("{wildcards.ontology_name:q}").unwrap(), "'my onto'");
        assert_eq!(
            ctx.render("{config.informant_class_path:q}").unwrap(),
            "informant_class.py"
        );
        assert!(matches!(
            ctx.render("{params.x:q}"),
            Err(Error::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn test_render_escaped_braces() {
        let workflow = workflow();
        let wildcards = wildcards();
        let ctx = TemplateContext::new("r", &workflow, &wildcards);

        assert_eq!(
            ctx.render("awk '{{print $1}}' ${{HOME}}").unwrap(),
            "awk '{print $1}' ${HOME}"
        );
    }

    #[test]
    fn test_render_unknown_placeholders() {
        let workflow = workflow();
        let wildcards = wildcards();
        let output = vec!["a".to_string()];
        let ctx = TemplateContext {
            output: Some(output.as_slice()),
            ..TemplateContext::new("r", &workflow, &wildcards)
        };

        for template in ["{HOME}", "{output.5}", "{params.x}", "{log}", "{wildcards.nope}", "{unclosed"] {
            assert!(
                matches!(ctx.render(template), Err(Error::UnknownPlaceholder { .. })),
                "template {} should fail",
                template
            );
        }
    }
}
