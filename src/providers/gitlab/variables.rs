use std::collections::HashSet;

use indexmap::IndexMap;
use regex::{Captures, Regex};

use crate::error::{PipeguardError, Result};
use crate::providers::gitlab::types::CiVariable;

/// Maximum number of substitution passes when values reference other variables
const MAX_RESOLUTION_PASSES: usize = 5;

/// Predefined GitLab variables whose value is known before the pipeline runs.
pub const PREDEFINED_VARIABLES: &[(&str, &str)] = &[
    ("CI_TEMPLATE_REGISTRY_HOST", "registry.gitlab.com"),
    ("SECURE_ANALYZERS_PREFIX", ""),
];

pub type VariableMap = IndexMap<String, String>;

/// All variable layers visible to one job, ordered by precedence at lookup time:
/// project > group > instance > job > pipeline-global > predefined.
#[derive(Debug, Clone, Default)]
pub struct VariableScopes<'a> {
    pub project: Option<&'a VariableMap>,
    pub group: Option<&'a VariableMap>,
    pub instance: Option<&'a VariableMap>,
    pub job: Option<&'a VariableMap>,
    pub global: Option<&'a VariableMap>,
    pub predefined: Option<&'a VariableMap>,
}

impl VariableScopes<'_> {
    fn lookup(&self, name: &str) -> Option<&str> {
        [
            self.project,
            self.group,
            self.instance,
            self.job,
            self.global,
            self.predefined,
        ]
        .into_iter()
        .flatten()
        .find_map(|scope| scope.get(name).map(String::as_str))
    }
}

/// Substitutes `$NAME`, `${NAME}` and `%NAME%` tokens from the given scopes.
pub struct VariableResolver {
    token: Regex,
}

impl VariableResolver {
    pub fn new() -> Result<Self> {
        let token = Regex::new(
            r"(\$[a-zA-Z_][a-zA-Z0-9_]*|\$\{[a-zA-Z_][a-zA-Z0-9_]*\}|%[a-zA-Z_][a-zA-Z0-9_]*%)",
        )
        .map_err(|e| PipeguardError::Config(format!("Invalid variable token pattern: {e}")))?;
        Ok(Self { token })
    }

    /// Resolve every known token, repeating while values expand into new tokens.
    ///
    /// Unknown tokens are kept verbatim so the image parser can still see them.
    pub fn resolve(&self, input: &str, scopes: &VariableScopes<'_>) -> String {
        let mut current = input.to_string();
        for _ in 0..MAX_RESOLUTION_PASSES {
            let next = self.resolve_once(&current, scopes);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn resolve_once(&self, input: &str, scopes: &VariableScopes<'_>) -> String {
        self.token
            .replace_all(input, |caps: &Captures<'_>| {
                let token = &caps[0];
                let name: String = token
                    .chars()
                    .filter(|c| !matches!(c, '$' | '{' | '}' | '%'))
                    .collect();
                scopes
                    .lookup(&name)
                    .map_or_else(|| token.to_string(), str::to_string)
            })
            .into_owned()
    }
}

pub fn predefined_variables() -> VariableMap {
    PREDEFINED_VARIABLES
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Flatten remote variables into a map; the first definition of a key wins.
pub fn variables_to_map(variables: &[CiVariable]) -> VariableMap {
    let mut map = VariableMap::new();
    for variable in variables {
        map.entry(variable.key.clone())
            .or_insert_with(|| variable.value.clone());
    }
    map
}

/// Merge group levels ordered nearest first; nearer groups shadow their parents.
pub fn merge_inherited(levels: &[Vec<CiVariable>]) -> Vec<CiVariable> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::new();
    for level in levels {
        for variable in level {
            if seen.insert(variable.key.as_str()) {
                merged.push(variable.clone());
            }
        }
    }
    merged
}
