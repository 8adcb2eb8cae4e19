use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::controls::{
    overall_compliance, AuthorizedSourcesControl, AuthorizedSourcesResult, BranchProtectionControl,
    BranchProtectionResult, ControlReport, ForbiddenTagsControl, ForbiddenTagsResult,
};
use crate::error::Result;
use crate::logging::LogContext;
use crate::output::PhaseProgress;
use crate::providers::gitlab::collaborators::{BranchSource, CatalogSource, CiConfigSource, VariableSource};
use crate::providers::gitlab::pipeline::PipelineResolver;
use crate::providers::gitlab::provenance::OriginMetrics;
use crate::providers::gitlab::types::ProjectInfo;

/// The three controls, built and validated from the policy file.
#[derive(Debug, Clone)]
pub struct PolicyControls {
    pub forbidden_tags: ForbiddenTagsControl,
    pub authorized_sources: AuthorizedSourcesControl,
    pub branch_protection: BranchProtectionControl,
}

impl PolicyControls {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            forbidden_tags: ForbiddenTagsControl::from_config(config)?,
            authorized_sources: AuthorizedSourcesControl::from_config(config)?,
            branch_protection: BranchProtectionControl::from_config(config),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageMetrics {
    pub total: usize,
}

/// Outcome of one analysis run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub project_path: String,
    pub project_id: u64,
    pub ci_valid: bool,
    pub ci_missing: bool,
    pub limited_analysis: bool,
    pub analyzed_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_origin_metrics: Option<OriginMetrics>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_image_metrics: Option<ImageMetrics>,

    #[serde(rename = "imageForbiddenTagsResult", skip_serializing_if = "Option::is_none")]
    pub forbidden_tags: Option<ForbiddenTagsResult>,

    #[serde(rename = "imageAuthorizedSourcesResult", skip_serializing_if = "Option::is_none")]
    pub authorized_sources: Option<AuthorizedSourcesResult>,

    #[serde(rename = "branchProtectionResult", skip_serializing_if = "Option::is_none")]
    pub branch_protection: Option<BranchProtectionResult>,
}

impl AnalysisResult {
    fn new(project: &ProjectInfo) -> Self {
        Self {
            project_path: project.path.clone(),
            project_id: project.id,
            ci_valid: false,
            ci_missing: false,
            limited_analysis: false,
            analyzed_at: Utc::now(),
            pipeline_origin_metrics: None,
            pipeline_image_metrics: None,
            forbidden_tags: None,
            authorized_sources: None,
            branch_protection: None,
        }
    }

    /// Control results present in this run, in report order.
    pub fn reports(&self) -> Vec<&dyn ControlReport> {
        let mut reports: Vec<&dyn ControlReport> = Vec::new();
        if let Some(result) = &self.forbidden_tags {
            reports.push(result);
        }
        if let Some(result) = &self.authorized_sources {
            reports.push(result);
        }
        if let Some(result) = &self.branch_protection {
            reports.push(result);
        }
        reports
    }

    pub fn compliance(&self) -> f64 {
        overall_compliance(&self.reports())
    }
}

/// Runs the pipeline resolution and every control for one project.
pub struct Analyzer<'a, S> {
    source: &'a S,
    instance_url: &'a str,
    controls: &'a PolicyControls,
    ctx: LogContext,
    show_progress: bool,
}

impl<'a, S> Analyzer<'a, S>
where
    S: CiConfigSource + CatalogSource + VariableSource + BranchSource,
{
    pub fn new(source: &'a S, instance_url: &'a str, controls: &'a PolicyControls) -> Self {
        Self {
            source,
            instance_url,
            controls,
            ctx: LogContext::new("analysis"),
            show_progress: false,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// A configuration that cannot be used still yields a result: the image
    /// controls score it 0% and branch protection is not checked.
    pub async fn run(&self, project: &ProjectInfo) -> Result<AnalysisResult> {
        let ctx = self.ctx.with_field("project", &project.path);
        let mut result = AnalysisResult::new(project);
        let progress = PhaseProgress::start(self.show_progress);

        let resolver = PipelineResolver::new(project, self.instance_url, &ctx);
        let mut pipeline = resolver.resolve_origins(self.source).await?;
        result.ci_valid = pipeline.ci_valid;
        result.ci_missing = pipeline.ci_missing;
        result.limited_analysis = pipeline.limited_analysis;
        result.pipeline_origin_metrics = Some(pipeline.origin_metrics.clone());

        if pipeline.limited_analysis {
            ctx.with_field("ciValid", pipeline.ci_valid)
                .with_field("ciMissing", pipeline.ci_missing)
                .warn("Limited analysis, CI configuration is not usable");
            result.forbidden_tags = Some(self.controls.forbidden_tags.run(&pipeline, &ctx));
            result.authorized_sources = Some(self.controls.authorized_sources.run(&pipeline, &ctx));
            progress.abandon("Stopped, CI configuration is not usable");
            return Ok(result);
        }

        let progress = progress.origins_resolved();
        resolver.resolve_images(self.source, &mut pipeline).await?;
        result.pipeline_image_metrics = Some(ImageMetrics {
            total: pipeline.images.len(),
        });
        result.forbidden_tags = Some(self.controls.forbidden_tags.run(&pipeline, &ctx));
        result.authorized_sources = Some(self.controls.authorized_sources.run(&pipeline, &ctx));

        let progress = progress.images_resolved();
        let branch_control = &self.controls.branch_protection;
        result.branch_protection = Some(if branch_control.enabled() {
            match self.source.fetch_branch_data(&project.path).await {
                Ok(data) => branch_control.run(&data, &project.default_branch, &ctx),
                Err(e) => {
                    ctx.warn(format!("Unable to collect branch protection data: {e}"));
                    BranchProtectionResult::failed(e)
                }
            }
        } else {
            branch_control.run(&Default::default(), &project.default_branch, &ctx)
        });

        progress.finish();
        ctx.with_field("compliance", format!("{:.1}", result.compliance()))
            .info("Analysis completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_yaml::Mapping;

    use super::*;
    use crate::config::{AuthorizedSourcesConfig, BranchProtectionConfig, ForbiddenTagsConfig};
    use crate::error::PipeguardError;
    use crate::providers::gitlab::ci_yaml::CiConfig;
    use crate::providers::gitlab::collaborators::{BranchData, FetchedCiConfig};
    use crate::providers::gitlab::types::{BranchProtection, CatalogResource, CiInclude, CiVariable, MergedCiConfig};

    const PIPELINE: &str = "\
stages: [build, deploy]
build:
  stage: build
  image: node:latest
  script: npm ci
deploy:
  stage: deploy
  image: registry.example.com/tools/deployer:2.1
  script: ./deploy.sh
";

    #[derive(Default)]
    struct FakeGitLab {
        config: Option<FetchedCiConfig>,
        branches: Option<BranchData>,
    }

    #[async_trait]
    impl CiConfigSource for FakeGitLab {
        async fn fetch_ci_config(&self, _project: &ProjectInfo) -> Result<FetchedCiConfig> {
            self.config.clone().ok_or(PipeguardError::ApiError {
                status: 404,
                message: "404 File Not Found".to_string(),
            })
        }

        async fn fetch_include_jobs(
            &self,
            _include: &CiInclude,
            _project_path: &str,
            _sha: &str,
            _inputs: Option<&Mapping>,
            _stages: &[String],
        ) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl CatalogSource for FakeGitLab {
        async fn fetch_catalog(&self, _is_group: bool) -> Result<Vec<CatalogResource>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl VariableSource for FakeGitLab {
        async fn instance_variables(&self) -> Result<Vec<CiVariable>> {
            Ok(Vec::new())
        }

        async fn group_variables(&self, _project_path: &str) -> Result<Vec<CiVariable>> {
            Ok(Vec::new())
        }

        async fn project_variables(&self, _project_path: &str) -> Result<Vec<CiVariable>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl BranchSource for FakeGitLab {
        async fn fetch_branch_data(&self, project_path: &str) -> Result<BranchData> {
            self.branches
                .clone()
                .ok_or_else(|| PipeguardError::ProjectNotFound(project_path.to_string()))
        }
    }

    fn create_project() -> ProjectInfo {
        ProjectInfo {
            id: 42,
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

    fn create_fetched_config() -> FetchedCiConfig {
        FetchedCiConfig {
            content: PIPELINE.to_string(),
            original: Some(CiConfig::parse(PIPELINE).unwrap()),
            merged: Some(CiConfig::parse(PIPELINE).unwrap()),
            response: Some(MergedCiConfig {
                merged_yaml: PIPELINE.to_string(),
                status: "VALID".to_string(),
                ..MergedCiConfig::default()
            }),
        }
    }

    fn create_controls(branch_protection: bool) -> PolicyControls {
        let mut config = Config::default();
        config.controls.container_image_must_not_use_forbidden_tags = Some(ForbiddenTagsConfig {
            enabled: Some(true),
            tags: Some(vec!["latest".to_string()]),
        });
        config.controls.container_image_must_come_from_authorized_sources =
            Some(AuthorizedSourcesConfig {
                enabled: Some(true),
                trusted_urls: vec!["registry.example.com/*".to_string()],
                trust_docker_hub_official_images: Some(true),
            });
        config.controls.branch_must_be_protected = Some(BranchProtectionConfig {
            enabled: Some(branch_protection),
            default_must_be_protected: Some(true),
            ..BranchProtectionConfig::default()
        });
        PolicyControls::from_config(&config).unwrap()
    }

    fn create_branches() -> BranchData {
        BranchData {
            branches: vec!["main".to_string()],
            protections: vec![BranchProtection {
                pattern: "main".to_string(),
                ..BranchProtection::default()
            }],
        }
    }

    #[tokio::test]
    async fn full_run_scores_every_control() {
        let fake = FakeGitLab {
            config: Some(create_fetched_config()),
            branches: Some(create_branches()),
        };
        let controls = create_controls(true);
        let analyzer = Analyzer::new(&fake, "https://gitlab.example.com", &controls);

        let result = analyzer.run(&create_project()).await.unwrap();

        assert!(result.ci_valid);
        assert!(!result.limited_analysis);
        assert_eq!(result.pipeline_image_metrics.as_ref().unwrap().total, 2);
        let tags = result.forbidden_tags.as_ref().unwrap();
        assert_eq!(tags.issues.len(), 1, "node:latest uses a forbidden tag");
        assert!(tags.compliance.abs() < f64::EPSILON);
        let sources = result.authorized_sources.as_ref().unwrap();
        assert!(sources.issues.is_empty(), "Got {:?}", sources.issues);
        let branches = result.branch_protection.as_ref().unwrap();
        assert!((branches.compliance - 100.0).abs() < f64::EPSILON);

        let overall = result.compliance();
        assert!((overall - 200.0 / 3.0).abs() < 1e-9, "Got {overall}");
    }

    #[tokio::test]
    async fn missing_configuration_is_limited() {
        let fake = FakeGitLab {
            config: None,
            branches: Some(create_branches()),
        };
        let controls = create_controls(true);
        let analyzer = Analyzer::new(&fake, "https://gitlab.example.com", &controls);

        let result = analyzer.run(&create_project()).await.unwrap();

        assert!(result.ci_missing);
        assert!(result.limited_analysis);
        assert!(result.branch_protection.is_none(), "Run stops after origins");
        assert!(result.pipeline_image_metrics.is_none());
        assert!(result.forbidden_tags.unwrap().compliance.abs() < f64::EPSILON);
        assert!(result.authorized_sources.unwrap().compliance.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn branch_data_failure_fails_only_that_control() {
        let fake = FakeGitLab {
            config: Some(create_fetched_config()),
            branches: None,
        };
        let controls = create_controls(true);
        let analyzer = Analyzer::new(&fake, "https://gitlab.example.com", &controls);

        let result = analyzer.run(&create_project()).await.unwrap();

        let branches = result.branch_protection.unwrap();
        assert!(branches.enabled);
        assert!(branches.compliance.abs() < f64::EPSILON);
        assert!(branches.error.unwrap().contains("group/app"));
        assert!(result.forbidden_tags.is_some());
    }

    #[tokio::test]
    async fn disabled_branch_control_is_skipped() {
        let fake = FakeGitLab {
            config: Some(create_fetched_config()),
            branches: None,
        };
        let controls = create_controls(false);
        let analyzer = Analyzer::new(&fake, "https://gitlab.example.com", &controls);

        let result = analyzer.run(&create_project()).await.unwrap();

        assert!(result.branch_protection.as_ref().unwrap().skipped);
        assert_eq!(result.reports().len(), 3);
        // forbidden tags 0, authorized sources 100, branch protection skipped
        assert!((result.compliance() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_policy_is_a_configuration_error() {
        let err = PolicyControls::from_config(&Config::default()).unwrap_err();
        assert!(matches!(err, PipeguardError::Config(_)));
    }
}
