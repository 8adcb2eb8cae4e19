use async_trait::async_trait;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::core::GitLabClient;
use crate::error::{PipeguardError, Result};
use crate::providers::gitlab::ci_yaml::CiConfig;
use crate::providers::gitlab::collaborators::{CiConfigSource, FetchedCiConfig};
use crate::providers::gitlab::types::{CiInclude, MergedCiConfig, ProjectInfo};

const CI_CONFIG_QUERY: &str = r#"
query getCiConfig($projectPath: ID!, $content: String!, $sha: String!, $dryRun: Boolean!) {
  ciConfig(projectPath: $projectPath, content: $content, sha: $sha, dryRun: $dryRun) {
    mergedYaml
    errors
    warnings
    status
    includes {
      location
      type
      extra
      raw
      contextProject
      blob
    }
  }
}
"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CiConfigVariables<'a> {
    project_path: &'a str,
    content: &'a str,
    sha: &'a str,
    dry_run: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CiConfigData {
    ci_config: Option<MergedCiConfig>,
}

/// Minimal configuration holding a single include, so GitLab expands only it.
///
/// `stages` is copied from the merged configuration so jobs referencing
/// custom stages stay valid.
pub fn build_include_config(
    include: &CiInclude,
    inputs: Option<&Mapping>,
    stages: &[String],
) -> Result<String> {
    let mut entry = Mapping::new();
    match include.include_type.as_str() {
        "local" | "template" | "remote" | "component" => {
            entry.insert(
                Value::from(include.include_type.as_str()),
                Value::from(include.location.as_str()),
            );
        }
        "file" => {
            entry.insert(Value::from("file"), Value::from(include.location.as_str()));
            entry.insert(Value::from("project"), Value::from(include.extra.project.as_str()));
            if !include.extra.ref_.is_empty() {
                entry.insert(Value::from("ref"), Value::from(include.extra.ref_.as_str()));
            }
        }
        other => return Err(PipeguardError::UnknownIncludeType(other.to_string())),
    }
    if let Some(inputs) = inputs.filter(|inputs| !inputs.is_empty()) {
        entry.insert(Value::from("inputs"), Value::Mapping(inputs.clone()));
    }

    let mut config = Mapping::new();
    if !stages.is_empty() {
        config.insert(
            Value::from("stages"),
            Value::Sequence(stages.iter().map(|stage| Value::from(stage.as_str())).collect()),
        );
    }
    config.insert(Value::from("include"), Value::Sequence(vec![Value::Mapping(entry)]));

    Ok(serde_yaml::to_string(&config)?)
}

impl GitLabClient {
    /// Raw content of a repository file. A missing file surfaces as an
    /// `ApiError` carrying status 404.
    pub async fn fetch_raw_file(&self, project_path: &str, file_path: &str, reference: &str) -> Result<String> {
        let url = self.api_endpoint(&["projects", project_path, "repository", "files", file_path, "raw"])?;
        let query: Vec<(&str, &str)> = if reference.is_empty() {
            Vec::new()
        } else {
            vec![("ref", reference)]
        };
        self.get_text(&url, &query).await
    }

    /// Expand `content` in the context of `project_path` at `sha`.
    pub async fn fetch_merged_config(&self, project_path: &str, content: &str, sha: &str) -> Result<MergedCiConfig> {
        let variables = CiConfigVariables {
            project_path,
            content,
            sha,
            dry_run: false,
        };
        let data: CiConfigData = self
            .execute_graphql_request("getCiConfig", CI_CONFIG_QUERY, variables)
            .await?;
        data.ci_config.ok_or(PipeguardError::NoResponseData)
    }
}

#[async_trait]
impl CiConfigSource for GitLabClient {
    async fn fetch_ci_config(&self, project: &ProjectInfo) -> Result<FetchedCiConfig> {
        if project.archived {
            info!("Archived project {}, skipping CI configuration", project.path);
            return Ok(FetchedCiConfig::default());
        }

        let content = self
            .fetch_raw_file(&project.path, &project.ci_config_path, &project.analyze_branch)
            .await
            .inspect_err(|e| error!("Unable to get CI configuration file of {}: {e}", project.path))?;

        let response = self
            .fetch_merged_config(&project.path, &content, &project.latest_commit_sha)
            .await
            .inspect_err(|e| error!("Unable to get merged CI configuration of {}: {e}", project.path))?;

        let original = match CiConfig::parse(&content) {
            Ok(config) => config,
            Err(e) if response.status == "INVALID" => {
                info!("CI configuration of {} does not parse and is reported invalid: {e}", project.path);
                return Ok(FetchedCiConfig {
                    content,
                    response: Some(response),
                    ..FetchedCiConfig::default()
                });
            }
            Err(e) => {
                error!("Unable to parse CI configuration of {}: {e}", project.path);
                return Err(e);
            }
        };

        let merged = CiConfig::parse(&response.merged_yaml)
            .inspect_err(|e| error!("Unable to parse merged CI configuration of {}: {e}", project.path))?;

        Ok(FetchedCiConfig {
            content,
            original: Some(original),
            merged: Some(merged),
            response: Some(response),
        })
    }

    async fn fetch_include_jobs(
        &self,
        include: &CiInclude,
        project_path: &str,
        sha: &str,
        inputs: Option<&Mapping>,
        stages: &[String],
    ) -> Result<Vec<String>> {
        let config = build_include_config(include, inputs, stages)?;
        debug!("Expanding include {} ({})", include.location, include.include_type);

        let response = self.fetch_merged_config(project_path, &config, sha).await?;
        if !response.errors.is_empty() {
            debug!(
                "Include {} expanded with errors: {}",
                include.location,
                response.errors.join("; ")
            );
        }

        let merged = CiConfig::parse(&response.merged_yaml)?;
        Ok(merged.jobs.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::core::tests::create_client;
    use super::*;
    use crate::providers::gitlab::types::IncludeExtra;
    use mockito::Matcher;

    fn create_include(include_type: &str, location: &str) -> CiInclude {
        CiInclude {
            location: location.to_string(),
            include_type: include_type.to_string(),
            ..CiInclude::default()
        }
    }

    fn create_project() -> ProjectInfo {
        ProjectInfo {
            id: 1,
            name: "app".to_string(),
            path: "group/app".to_string(),
            ci_config_path: ".gitlab-ci.yml".to_string(),
            default_branch: "main".to_string(),
            analyze_branch: "main".to_string(),
            latest_commit_sha: "abc123".to_string(),
            archived: false,
            is_group: true,
        }
    }

    mod build_include_config {
        use super::*;

        fn parse(config: &str) -> Value {
            serde_yaml::from_str(config).unwrap()
        }

        #[test]
        fn local_include_with_stages() {
            let include = create_include("local", "ci/build.yml");
            let stages = vec!["build".to_string(), "deploy".to_string()];
            let config = parse(&build_include_config(&include, None, &stages).unwrap());

            assert_eq!(config["stages"][0], "build");
            assert_eq!(config["stages"][1], "deploy");
            assert_eq!(config["include"][0]["local"], "ci/build.yml");
        }

        #[test]
        fn stages_are_omitted_when_empty() {
            let include = create_include("template", "Jobs/SAST.gitlab-ci.yml");
            let config = parse(&build_include_config(&include, None, &[]).unwrap());
            assert!(config.get("stages").is_none());
        }

        #[test]
        fn file_include_with_project_and_ref() {
            let mut include = create_include("file", "/templates/lint.yml");
            include.extra = IncludeExtra {
                project: "shared/ci".to_string(),
                ref_: "v2".to_string(),
            };
            let config = parse(&build_include_config(&include, None, &[]).unwrap());

            let entry = &config["include"][0];
            assert_eq!(entry["file"], "/templates/lint.yml");
            assert_eq!(entry["project"], "shared/ci");
            assert_eq!(entry["ref"], "v2");
        }

        #[test]
        fn file_include_without_ref() {
            let mut include = create_include("file", "/templates/lint.yml");
            include.extra.project = "shared/ci".to_string();
            let config = parse(&build_include_config(&include, None, &[]).unwrap());
            assert!(config["include"][0].get("ref").is_none());
        }

        #[test]
        fn component_include_with_inputs() {
            let include = create_include("component", "gitlab.com/acme/sast@1.0.0");
            let inputs: Mapping = serde_yaml::from_str("stage: test\njob_prefix: sast").unwrap();
            let config = parse(&build_include_config(&include, Some(&inputs), &[]).unwrap());

            let entry = &config["include"][0];
            assert_eq!(entry["component"], "gitlab.com/acme/sast@1.0.0");
            assert_eq!(entry["inputs"]["stage"], "test", "Inputs nest under the entry");
            assert_eq!(entry["inputs"]["job_prefix"], "sast");
        }

        #[test]
        fn special_characters_survive() {
            let include = create_include("remote", "https://example.com/ci.yml?ref=\"main\"");
            let stages = vec!["deploy: prod".to_string(), "#notes".to_string()];
            let config = parse(&build_include_config(&include, None, &stages).unwrap());

            assert_eq!(config["include"][0]["remote"], "https://example.com/ci.yml?ref=\"main\"");
            assert_eq!(config["stages"][0], "deploy: prod");
            assert_eq!(config["stages"][1], "#notes");
        }

        #[test]
        fn unknown_type_is_rejected() {
            let include = create_include("artifact", "generated.yml");
            let err = build_include_config(&include, None, &[]).unwrap_err();
            assert!(matches!(err, PipeguardError::UnknownIncludeType(t) if t == "artifact"));
        }
    }

    mod fetch_ci_config {
        use super::*;

        #[tokio::test]
        async fn archived_project_yields_nothing() {
            let server = mockito::Server::new_async().await;
            let client = create_client(&server.url());
            let mut project = create_project();
            project.archived = true;

            let fetched = client.fetch_ci_config(&project).await.unwrap();
            assert!(fetched.response.is_none());
            assert!(fetched.original.is_none());
        }

        #[tokio::test]
        async fn missing_file_reports_404() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock(
                    "GET",
                    "/api/v4/projects/group%2Fapp/repository/files/.gitlab-ci.yml/raw",
                )
                .match_query(Matcher::Any)
                .with_status(404)
                .with_body(r#"{"message":"404 File Not Found"}"#)
                .create_async()
                .await;
            let client = create_client(&server.url());

            let err = client.fetch_ci_config(&create_project()).await.unwrap_err();
            assert!(err.is_not_found());
            assert!(err.to_string().contains("404"));
        }

        #[tokio::test]
        async fn parses_original_and_merged() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock(
                    "GET",
                    "/api/v4/projects/group%2Fapp/repository/files/.gitlab-ci.yml/raw",
                )
                .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
                .with_status(200)
                .with_body("include:\n  - local: build.yml\nlint:\n  script: lint\n")
                .create_async()
                .await;
            server
                .mock("POST", "/api/graphql")
                .match_body(Matcher::PartialJson(serde_json::json!({
                    "operationName": "getCiConfig",
                    "variables": {"projectPath": "group/app", "sha": "abc123", "dryRun": false}
                })))
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(
                    r#"{"data": {"ciConfig": {
                        "mergedYaml": "build:\n  script: make\nlint:\n  script: lint\n",
                        "errors": [],
                        "warnings": [],
                        "status": "VALID",
                        "includes": [{"location": "build.yml", "type": "local", "extra": {}, "raw": "", "contextProject": null, "blob": ""}]
                    }}}"#,
                )
                .create_async()
                .await;
            let client = create_client(&server.url());

            let fetched = client.fetch_ci_config(&create_project()).await.unwrap();

            let original = fetched.original.unwrap();
            let merged = fetched.merged.unwrap();
            assert_eq!(original.jobs.len(), 1);
            assert_eq!(merged.jobs.keys().collect::<Vec<_>>(), vec!["build", "lint"]);
            let response = fetched.response.unwrap();
            assert_eq!(response.includes.len(), 1);
            assert_eq!(response.includes[0].include_type, "local");
        }

        #[tokio::test]
        async fn unparsable_invalid_config_is_returned_without_documents() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock(
                    "GET",
                    "/api/v4/projects/group%2Fapp/repository/files/.gitlab-ci.yml/raw",
                )
                .match_query(Matcher::Any)
                .with_status(200)
                .with_body("- just\n- a list\n")
                .create_async()
                .await;
            server
                .mock("POST", "/api/graphql")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(
                    r#"{"data": {"ciConfig": {"mergedYaml": null, "errors": ["jobs config should contain at least one visible job"], "warnings": [], "status": "INVALID", "includes": null}}}"#,
                )
                .create_async()
                .await;
            let client = create_client(&server.url());

            let fetched = client.fetch_ci_config(&create_project()).await.unwrap();
            assert!(fetched.original.is_none());
            assert!(fetched.merged.is_none());
            assert!(fetched.response.unwrap().is_invalid());
            assert_eq!(fetched.content, "- just\n- a list\n");
        }
    }

    mod fetch_include_jobs {
        use super::*;

        #[tokio::test]
        async fn returns_job_names_of_expanded_include() {
            let include = create_include("template", "Jobs/SAST.gitlab-ci.yml");
            let content = build_include_config(&include, None, &[]).unwrap();
            let mut server = mockito::Server::new_async().await;
            server
                .mock("POST", "/api/graphql")
                .match_body(Matcher::PartialJson(serde_json::json!({
                    "variables": {"content": content}
                })))
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(
                    r#"{"data": {"ciConfig": {"mergedYaml": "sast:\n  script: scan\nsemgrep-sast:\n  extends: sast\n", "errors": [], "status": "VALID"}}}"#,
                )
                .create_async()
                .await;
            let client = create_client(&server.url());

            let jobs = client
                .fetch_include_jobs(&include, "group/app", "abc123", None, &[])
                .await
                .unwrap();
            assert_eq!(jobs, vec!["sast", "semgrep-sast"]);
        }
    }
}
