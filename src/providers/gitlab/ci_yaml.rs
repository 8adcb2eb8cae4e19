use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};

use crate::error::{PipeguardError, Result};

/// Top-level keywords of a `.gitlab-ci.yml` that are not job definitions.
const RESERVED_KEYS: &[&str] = &[
    "image",
    "variables",
    "stages",
    "before_script",
    "after_script",
    "script",
    "default",
    "spec",
    "include",
    "workflow",
    "cache",
];

/// A parsed GitLab CI configuration, either as written in the repository or
/// as returned fully expanded by the `ciConfig` query.
#[derive(Debug, Clone, Default)]
pub struct CiConfig {
    pub image: Option<Value>,
    pub variables: Mapping,
    pub stages: Vec<String>,
    pub default: Option<Value>,
    /// Include entries, each either a plain string or a mapping
    pub include: Vec<Value>,
    /// Every other top-level key, in file order
    pub jobs: IndexMap<String, Value>,
}

impl CiConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mapping = match value {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(PipeguardError::Config(format!(
                    "CI configuration root must be a mapping, found {}",
                    value_kind(&other)
                )))
            }
        };

        let mut config = Self::default();
        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                continue;
            };
            match key {
                "image" => config.image = Some(value),
                "variables" => {
                    if let Value::Mapping(vars) = value {
                        config.variables = vars;
                    }
                }
                "stages" => config.stages = string_list(&value),
                "default" => config.default = Some(value),
                "include" => config.include = include_entries(value),
                _ if RESERVED_KEYS.contains(&key) => {}
                _ => {
                    config.jobs.insert(key.to_string(), value);
                }
            }
        }
        Ok(config)
    }

    /// Image declared under `default:`, falling back to the root `image:`.
    pub fn default_image(&self) -> Option<String> {
        self.default
            .as_ref()
            .and_then(|d| d.get("image"))
            .and_then(image_name)
            .or_else(|| self.image.as_ref().and_then(image_name))
    }

    pub fn global_variables(&self) -> IndexMap<String, String> {
        variables_from_mapping(&self.variables)
    }
}

/// Image reference from either `image: name` or `image: {name: ...}`.
pub fn image_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.clone()),
        Value::Mapping(map) => map
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Value of a CI variable declared either inline or as `{value: ..., description: ...}`.
pub fn variable_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Mapping(map) => Some(
            map.get("value")
                .and_then(variable_value)
                .unwrap_or_default(),
        ),
        _ => None,
    }
}

pub fn job_image(job: &Value) -> Option<String> {
    job.get("image").and_then(image_name)
}

pub fn job_variables(job: &Value) -> IndexMap<String, String> {
    match job.get("variables") {
        Some(Value::Mapping(vars)) => variables_from_mapping(vars),
        _ => IndexMap::new(),
    }
}

/// Names listed under `extends:`. A list holding anything but strings yields nothing.
pub fn job_extends(job: &Value) -> Vec<String> {
    match job.get("extends") {
        Some(Value::String(name)) => vec![name.clone()],
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Number of lines of the job once serialized back to YAML.
pub fn job_line_count(job: &Value) -> usize {
    serde_yaml::to_string(job)
        .map(|s| s.matches('\n').count())
        .unwrap_or(0)
}

fn variables_from_mapping(vars: &Mapping) -> IndexMap<String, String> {
    vars.iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), variable_value(v)?)))
        .collect()
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn include_entries(value: Value) -> Vec<Value> {
    match value {
        Value::Sequence(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
image: alpine:3.19
stages:
  - build
  - test
variables:
  REGISTRY: registry.example.com
  RETRIES: 3
  DEBUG: true
  DESCRIBED:
    value: "on"
    description: "A described variable"
include:
  - local: templates/build.yml
  - "https://example.com/ci.yml"
workflow:
  rules:
    - when: always
build:
  stage: build
  image:
    name: $REGISTRY/builder:1.0
  extends: .base
  script:
    - make
.base:
  variables:
    TARGET: release
"#;

    mod parse {
        use super::*;

        #[test]
        fn separates_reserved_keys_from_jobs() {
            let config = CiConfig::parse(SAMPLE).unwrap();
            let jobs: Vec<&str> = config.jobs.keys().map(String::as_str).collect();
            assert_eq!(jobs, vec!["build", ".base"], "Only jobs should remain");
            assert_eq!(config.stages, vec!["build", "test"]);
            assert_eq!(config.include.len(), 2);
        }

        #[test]
        fn empty_document_is_an_empty_config() {
            let config = CiConfig::parse("").unwrap();
            assert!(config.jobs.is_empty());
            assert!(config.include.is_empty());
        }

        #[test]
        fn scalar_root_is_rejected() {
            assert!(CiConfig::parse("just a string").is_err());
        }

        #[test]
        fn single_include_is_normalized_to_a_list() {
            let config = CiConfig::parse("include: templates/a.yml\n").unwrap();
            assert_eq!(config.include, vec![Value::from("templates/a.yml")]);
        }
    }

    mod default_image {
        use super::*;

        #[test]
        fn prefers_default_section() {
            let config =
                CiConfig::parse("image: ruby:3\ndefault:\n  image: node:20\n").unwrap();
            assert_eq!(config.default_image().as_deref(), Some("node:20"));
        }

        #[test]
        fn falls_back_to_root_image() {
            let config = CiConfig::parse(SAMPLE).unwrap();
            assert_eq!(config.default_image().as_deref(), Some("alpine:3.19"));
        }

        #[test]
        fn none_when_not_declared() {
            let config = CiConfig::parse("job:\n  script: echo\n").unwrap();
            assert_eq!(config.default_image(), None);
        }
    }

    mod variables {
        use super::*;

        #[test]
        fn converts_scalars_and_described_values() {
            let config = CiConfig::parse(SAMPLE).unwrap();
            let vars = config.global_variables();
            assert_eq!(vars["REGISTRY"], "registry.example.com");
            assert_eq!(vars["RETRIES"], "3");
            assert_eq!(vars["DEBUG"], "true");
            assert_eq!(vars["DESCRIBED"], "on");
        }

        #[test]
        fn reads_job_variables() {
            let config = CiConfig::parse(SAMPLE).unwrap();
            let vars = job_variables(&config.jobs[".base"]);
            assert_eq!(vars["TARGET"], "release");
        }
    }

    mod job_fields {
        use super::*;

        #[test]
        fn image_from_mapping() {
            let config = CiConfig::parse(SAMPLE).unwrap();
            assert_eq!(
                job_image(&config.jobs["build"]).as_deref(),
                Some("$REGISTRY/builder:1.0")
            );
        }

        #[test]
        fn extends_as_string_or_list() {
            let single: Value = serde_yaml::from_str("extends: .base").unwrap();
            let list: Value = serde_yaml::from_str("extends: [.a, .b]").unwrap();
            assert_eq!(job_extends(&single), vec![".base"]);
            assert_eq!(job_extends(&list), vec![".a", ".b"]);
        }

        #[test]
        fn extends_with_non_string_item_is_ignored() {
            let job: Value = serde_yaml::from_str("extends: [.a, 3]").unwrap();
            assert!(job_extends(&job).is_empty());
        }

        #[test]
        fn counts_serialized_lines() {
            let job: Value = serde_yaml::from_str("stage: build\nscript:\n  - make\n").unwrap();
            assert_eq!(job_line_count(&job), 3);
        }
    }
}
