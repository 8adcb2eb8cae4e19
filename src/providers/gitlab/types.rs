use serde::{Deserialize, Deserializer, Serialize};

/// GitLab project metadata needed to drive an analysis run.
#[derive(Debug, Clone, Default)]
pub struct ProjectInfo {
    /// Numeric project ID on the GitLab instance
    pub id: u64,
    pub name: String,
    /// Full path with namespace (e.g., "group/subgroup/project")
    pub path: String,
    /// Path of the CI configuration file inside the repository
    pub ci_config_path: String,
    /// Default branch reported by GitLab
    pub default_branch: String,
    /// Branch whose CI configuration is analyzed (defaults to the default branch)
    pub analyze_branch: String,
    /// SHA of the latest commit on the default branch, or "HEAD"
    pub latest_commit_sha: String,
    pub archived: bool,
    /// True when the project lives in a group namespace rather than a user namespace
    pub is_group: bool,
}

/// Response of the `ciConfig` GraphQL query.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedCiConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub merged_yaml: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub warnings: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub includes: Vec<CiInclude>,
}

impl MergedCiConfig {
    pub fn is_invalid(&self) -> bool {
        !self.errors.is_empty() || self.status == "INVALID"
    }
}

/// One inclusion occurrence as reported by the expansion service.
///
/// Nested inclusions are listed too; they carry the including project in
/// `context_project`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiInclude {
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub include_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub context_project: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub raw: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blob: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub extra: IncludeExtra,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct IncludeExtra {
    #[serde(default, deserialize_with = "null_as_default")]
    pub project: String,
    #[serde(rename = "ref", default, deserialize_with = "null_as_default")]
    pub ref_: String,
}

/// A CI/CD catalog resource with every published version.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogResource {
    pub id: String,
    pub name: String,
    pub full_path: String,
    pub web_path: String,
    pub versions: Vec<CatalogVersion>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogVersion {
    pub name: String,
    pub components: Vec<CatalogComponent>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogComponent {
    pub id: String,
    pub name: String,
    /// Include path, e.g. "gitlab.com/group/components/sast@1.2.0"
    pub include_path: String,
}

/// A CI/CD variable defined at instance, group or project level.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiVariable {
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub variable_type: String,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub protected: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub environment_scope: String,
}

/// A protected-branch rule as configured on the project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProtection {
    /// Branch name or `*` wildcard pattern the rule applies to
    pub pattern: String,
    pub allow_force_push: bool,
    pub code_owner_approval_required: bool,
    pub push_access_levels: Vec<AccessLevelEntry>,
    pub merge_access_levels: Vec<AccessLevelEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLevelEntry {
    pub access_level: u32,
    pub access_level_description: String,
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_config_tolerates_nulls() {
        let json = r#"{
            "mergedYaml": null,
            "errors": null,
            "status": "VALID",
            "includes": [
                {"location": "templates/build.yml", "type": "local", "extra": null, "contextProject": "group/app"}
            ]
        }"#;
        let config: MergedCiConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.merged_yaml, "");
        assert!(config.errors.is_empty());
        assert_eq!(config.includes.len(), 1);
        assert_eq!(config.includes[0].include_type, "local");
        assert_eq!(config.includes[0].extra, IncludeExtra::default());
        assert!(!config.is_invalid());
    }

    #[test]
    fn include_extra_reads_ref() {
        let json = r#"{"location": "ci/a.yml", "type": "file", "extra": {"project": "group/shared", "ref": "v1.0"}}"#;
        let include: CiInclude = serde_json::from_str(json).unwrap();
        assert_eq!(include.extra.project, "group/shared");
        assert_eq!(include.extra.ref_, "v1.0");
    }

    #[test]
    fn invalid_status_marks_config_invalid() {
        let config = MergedCiConfig {
            status: "INVALID".to_string(),
            ..Default::default()
        };
        assert!(config.is_invalid());
    }
}
