use log::{debug, warn};
use serde::Deserialize;

use super::core::GitLabClient;
use crate::error::{PipeguardError, Result};
use crate::providers::gitlab::types::ProjectInfo;

const DEFAULT_CI_CONFIG_PATH: &str = ".gitlab-ci.yml";

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    id: u64,
    #[serde(default)]
    name: String,
    path_with_namespace: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    ci_config_path: Option<String>,
    #[serde(default)]
    namespace: Option<NamespaceResponse>,
}

#[derive(Debug, Deserialize)]
struct NamespaceResponse {
    #[serde(default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    id: String,
}

impl GitLabClient {
    /// Look a project up by its full path.
    ///
    /// `branch` overrides the analyzed branch; it defaults to the project's
    /// default branch.
    pub async fn fetch_project(&self, project_path: &str, branch: Option<&str>) -> Result<ProjectInfo> {
        let url = self.api_endpoint(&["projects", project_path])?;
        let project: ProjectResponse = self.get_json(&url, &[]).await.map_err(|e| {
            if e.is_not_found() {
                PipeguardError::ProjectNotFound(project_path.to_string())
            } else {
                e
            }
        })?;

        let default_branch = project.default_branch.unwrap_or_default();
        let analyze_branch = branch
            .filter(|b| !b.is_empty())
            .map_or_else(|| default_branch.clone(), str::to_string);

        let latest_commit_sha = match self.fetch_latest_commit_sha(project_path, &analyze_branch).await {
            Ok(sha) => sha,
            Err(e) => {
                warn!("Unable to fetch latest commit of {project_path}: {e}");
                "HEAD".to_string()
            }
        };

        let info = ProjectInfo {
            id: project.id,
            name: project.name,
            path: project.path_with_namespace,
            ci_config_path: project
                .ci_config_path
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_CI_CONFIG_PATH.to_string()),
            default_branch,
            analyze_branch,
            latest_commit_sha,
            archived: project.archived,
            is_group: project
                .namespace
                .is_some_and(|namespace| namespace.kind == "group"),
        };
        debug!(
            "Fetched project {} (default branch {}, commit {})",
            info.path, info.default_branch, info.latest_commit_sha
        );
        Ok(info)
    }

    async fn fetch_latest_commit_sha(&self, project_path: &str, branch: &str) -> Result<String> {
        let branch = if branch.is_empty() { "main" } else { branch };
        let url = self.api_endpoint(&["projects", project_path, "repository", "commits"])?;
        let commits: Vec<CommitResponse> = self
            .get_json(&url, &[("ref_name", branch), ("per_page", "1"), ("page", "1")])
            .await?;
        Ok(commits
            .into_iter()
            .next()
            .map_or_else(|| "HEAD".to_string(), |commit| commit.id))
    }
}
