use log::info;

use crate::analysis::{AnalysisResult, Analyzer, PolicyControls};
use crate::auth::Token;
use crate::config::GitLabConfig;
use crate::error::Result;
use crate::logging::LogContext;

use super::client::GitLabClient;

/// GitLab trust-policy provider.
///
/// Looks the project up through the REST API, then hands the client to the
/// analyzer, which uses it for every collaborator the pipeline resolution
/// and the controls need.
pub struct GitLabProvider {
    pub client: GitLabClient,
    pub project_path: String,
}

impl GitLabProvider {
    /// Creates a new GitLab provider for the specified project.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
    /// * `project_path` - Project path (e.g., "group/project")
    /// * `token` - Optional authentication token
    /// * `settings` - Timeout and retry settings from the policy file
    ///
    /// # Errors
    ///
    /// Returns an error if the API endpoint URLs cannot be constructed.
    pub fn new(
        base_url: &str,
        project_path: String,
        token: Option<Token>,
        settings: &GitLabConfig,
    ) -> Result<Self> {
        let client = GitLabClient::new(
            base_url,
            token,
            settings.timeout(),
            settings.retry_policy(),
        )?;

        Ok(Self {
            client,
            project_path,
        })
    }

    /// Analyzes the project against the policy controls.
    ///
    /// `branch` overrides the default branch as the ref whose configuration is read.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be looked up. Configuration and
    /// branch data problems are reported inside the result instead.
    pub async fn analyze(
        &self,
        branch: Option<&str>,
        controls: &PolicyControls,
        show_progress: bool,
    ) -> Result<AnalysisResult> {
        info!("Starting analysis for project: {}", self.project_path);

        let ctx = LogContext::new("provider").with_field("project", &self.project_path);
        let project = self
            .client
            .fetch_project(&self.project_path, branch)
            .await
            .inspect_err(|e| ctx.error(format!("Project lookup failed: {e}")))?;
        info!(
            "Project {} (id {}), analyzing branch {}",
            project.path, project.id, project.analyze_branch
        );

        Analyzer::new(&self.client, self.client.instance_url(), controls)
            .with_progress(show_progress)
            .run(&project)
            .await
    }
}
