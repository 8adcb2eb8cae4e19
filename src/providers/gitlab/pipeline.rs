use indexmap::IndexMap;
use serde::Serialize;

use crate::error::Result;
use crate::logging::LogContext;
use crate::providers::gitlab::ci_yaml;
use crate::providers::gitlab::collaborators::{
    CatalogSource, CiConfigSource, FetchedCiConfig, VariableSource,
};
use crate::providers::gitlab::image::ResolvedImage;
use crate::providers::gitlab::jobs::{JobRecord, JobTable};
use crate::providers::gitlab::provenance::{
    build_inputs_map, CatalogIndex, Origin, OriginMetrics, ProvenanceResolver,
};
use crate::providers::gitlab::types::{CiVariable, ProjectInfo};
use crate::providers::gitlab::variables::{
    predefined_variables, variables_to_map, VariableMap, VariableResolver, VariableScopes,
};

/// Everything the policy controls read about one project's pipeline.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineAnalysis {
    pub ci_valid: bool,
    pub ci_missing: bool,
    /// Set when resolution stopped after fetching the configuration
    pub limited_analysis: bool,
    pub jobs: IndexMap<String, JobRecord>,
    pub origins: Vec<Origin>,
    pub origin_metrics: OriginMetrics,
    pub images: Vec<ResolvedImage>,
    #[serde(skip)]
    pub(crate) config: FetchedCiConfig,
}

impl PipelineAnalysis {
    fn limited(ci_valid: bool, ci_missing: bool) -> Self {
        Self {
            ci_valid,
            ci_missing,
            limited_analysis: true,
            ..Self::default()
        }
    }
}

/// Sequences origin resolution and image resolution for one project.
pub struct PipelineResolver<'a> {
    project: &'a ProjectInfo,
    instance_url: &'a str,
    ctx: LogContext,
}

impl<'a> PipelineResolver<'a> {
    pub fn new(project: &'a ProjectInfo, instance_url: &'a str, ctx: &LogContext) -> Self {
        Self {
            project,
            instance_url,
            ctx: ctx.with_field("project", &project.path),
        }
    }

    /// Fetch the configuration and attribute every merged job to an origin.
    ///
    /// A configuration that cannot be fetched or is invalid yields a limited
    /// analysis rather than an error.
    pub async fn resolve_origins<S>(&self, source: &S) -> Result<PipelineAnalysis>
    where
        S: CiConfigSource + CatalogSource,
    {
        let fetched = match source.fetch_ci_config(self.project).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let missing = e.is_not_found() || e.to_string().contains("404");
                self.ctx
                    .with_field("missing", missing)
                    .warn(format!("Unable to fetch CI configuration: {e}"));
                return Ok(PipelineAnalysis::limited(missing, missing));
            }
        };

        let (response, original, merged) = match (&fetched.response, &fetched.original, &fetched.merged) {
            (Some(response), _, _) if response.is_invalid() => {
                let missing = fetched.content.trim().is_empty();
                self.ctx
                    .with_field("errors", response.errors.join("; "))
                    .warn("CI configuration is invalid");
                return Ok(PipelineAnalysis::limited(missing, missing));
            }
            (Some(response), Some(original), Some(merged)) => (response, original, merged),
            _ => {
                self.ctx.info("No CI configuration to analyze");
                return Ok(PipelineAnalysis::limited(true, true));
            }
        };

        let resources = match source.fetch_catalog(self.project.is_group).await {
            Ok(resources) => resources,
            Err(e) => {
                self.ctx
                    .warn(format!("Unable to fetch CI/CD catalog, components will not be matched: {e}"));
                Vec::new()
            }
        };
        let catalog = CatalogIndex::build(resources, self.instance_url);
        self.ctx
            .with_field("resources", catalog.len())
            .debug("Catalog loaded");

        let inputs = build_inputs_map(original, self.instance_url);
        let mut table = JobTable::build(original, merged);
        let resolver = ProvenanceResolver::new(
            self.project,
            self.instance_url,
            catalog,
            inputs,
            self.ctx.with_field("phase", "origins"),
        );
        let origins = resolver
            .resolve(source, &response.includes, &merged.stages, &mut table)
            .await?;
        let origin_metrics = OriginMetrics::compute(&table, &origins);
        self.ctx
            .with_field("origins", origins.len())
            .with_field("jobs", table.len())
            .info("Pipeline origins resolved");

        Ok(PipelineAnalysis {
            ci_valid: true,
            ci_missing: false,
            limited_analysis: false,
            jobs: table.into_jobs(),
            origins,
            origin_metrics,
            images: Vec::new(),
            config: fetched,
        })
    }

    /// Resolve the image of every merged job. Does nothing on a limited analysis.
    pub async fn resolve_images<S>(&self, source: &S, analysis: &mut PipelineAnalysis) -> Result<()>
    where
        S: VariableSource,
    {
        let Some(merged) = analysis.config.merged.as_ref() else {
            return Ok(());
        };
        if analysis.limited_analysis || !analysis.ci_valid || analysis.ci_missing {
            return Ok(());
        }

        let resolver = VariableResolver::new()?;
        let (instance, group, project) = self.fetch_variable_scopes(source).await;
        let global = merged.global_variables();
        let predefined = predefined_variables();
        let default_image = merged.default_image().unwrap_or_default();

        let mut images = Vec::new();
        for (name, content) in &merged.jobs {
            let ctx = self.ctx.with_field("job", name);
            let job_variables = ci_yaml::job_variables(content);
            let original = ci_yaml::job_image(content).unwrap_or_else(|| default_image.clone());

            let scopes = VariableScopes {
                project: Some(&project),
                group: Some(&group),
                instance: Some(&instance),
                job: Some(&job_variables),
                global: Some(&global),
                predefined: Some(&predefined),
            };
            let resolved = resolver.resolve(&original, &scopes);
            if resolved.is_empty() {
                ctx.warn("Job without image");
                continue;
            }

            let image = ResolvedImage::new(name, &original, &resolved);
            ctx.with_field("registry", &image.registry)
                .with_field("image", &image.name)
                .with_field("tag", &image.tag)
                .debug("Image resolved");
            images.push(image);
        }

        self.ctx
            .with_field("images", images.len())
            .info("Pipeline images resolved");
        analysis.images = images;
        Ok(())
    }

    /// Instance, group and project variables. A scope that cannot be read is
    /// treated as empty.
    async fn fetch_variable_scopes<S>(&self, source: &S) -> (VariableMap, VariableMap, VariableMap)
    where
        S: VariableSource,
    {
        let is_group = self.project.is_group;
        let instance = async {
            if is_group {
                Ok(Vec::new())
            } else {
                source.instance_variables().await
            }
        };
        let (instance, group, project) = futures::join!(
            instance,
            source.group_variables(&self.project.path),
            source.project_variables(&self.project.path),
        );

        (
            self.scope_or_empty("instance", instance),
            self.scope_or_empty("group", group),
            self.scope_or_empty("project", project),
        )
    }

    fn scope_or_empty(&self, scope: &'static str, result: Result<Vec<CiVariable>>) -> VariableMap {
        match result {
            Ok(variables) => {
                self.ctx
                    .with_field("scope", scope)
                    .with_field("count", variables.len())
                    .debug("Variables fetched");
                variables_to_map(&variables)
            }
            Err(e) => {
                self.ctx
                    .with_field("scope", scope)
                    .warn(format!("Unable to fetch variables: {e}"));
                VariableMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_yaml::Mapping;

    use super::*;
    use crate::error::PipeguardError;
    use crate::providers::gitlab::ci_yaml::CiConfig;
    use crate::providers::gitlab::provenance::OriginKind;
    use crate::providers::gitlab::types::{CatalogResource, CiInclude, MergedCiConfig};

    const INSTANCE: &str = "https://gitlab.example.com";

    const ORIGINAL: &str = "\
include:
  - local: ci/build.yml
variables:
  NODE_VERSION: \"20\"
lint:
  image: node:$NODE_VERSION
  script: npm run lint
";

    const MERGED: &str = "\
variables:
  NODE_VERSION: \"20\"
default:
  image: alpine:3.19
build:
  image: $REGISTRY/tools/builder:$TAG
  script: make
lint:
  image: node:$NODE_VERSION
  script: npm run lint
notify:
  script: echo done
";

    /// In-memory GitLab: every collaborator answer is preset.
    #[derive(Default)]
    struct FakeGitLab {
        config: Option<FetchedCiConfig>,
        include_jobs: HashMap<String, Vec<String>>,
        catalog_fails: bool,
        group_vars: Vec<CiVariable>,
        project_vars: Vec<CiVariable>,
        instance_fails: bool,
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
            include: &CiInclude,
            _project_path: &str,
            _sha: &str,
            _inputs: Option<&Mapping>,
            _stages: &[String],
        ) -> Result<Vec<String>> {
            self.include_jobs
                .get(&include.location)
                .cloned()
                .ok_or_else(|| PipeguardError::Api("include unavailable".to_string()))
        }
    }

    #[async_trait]
    impl CatalogSource for FakeGitLab {
        async fn fetch_catalog(&self, _is_group: bool) -> Result<Vec<CatalogResource>> {
            if self.catalog_fails {
                Err(PipeguardError::Api("catalog requires premium".to_string()))
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[async_trait]
    impl VariableSource for FakeGitLab {
        async fn instance_variables(&self) -> Result<Vec<CiVariable>> {
            if self.instance_fails {
                Err(PipeguardError::Api("admin only".to_string()))
            } else {
                Ok(vec![create_variable("TAG", "from-instance")])
            }
        }

        async fn group_variables(&self, _project_path: &str) -> Result<Vec<CiVariable>> {
            Ok(self.group_vars.clone())
        }

        async fn project_variables(&self, _project_path: &str) -> Result<Vec<CiVariable>> {
            Ok(self.project_vars.clone())
        }
    }

    fn create_variable(key: &str, value: &str) -> CiVariable {
        CiVariable {
            key: key.to_string(),
            value: value.to_string(),
            ..CiVariable::default()
        }
    }

    fn create_project(is_group: bool) -> ProjectInfo {
        ProjectInfo {
            id: 7,
            name: "app".to_string(),
            path: "group/app".to_string(),
            ci_config_path: ".gitlab-ci.yml".to_string(),
            default_branch: "main".to_string(),
            analyze_branch: "main".to_string(),
            latest_commit_sha: "abc123".to_string(),
            archived: false,
            is_group,
        }
    }

    fn create_config() -> FetchedCiConfig {
        let response = MergedCiConfig {
            merged_yaml: MERGED.to_string(),
            status: "VALID".to_string(),
            includes: vec![CiInclude {
                location: "ci/build.yml".to_string(),
                include_type: "local".to_string(),
                context_project: "group/app".to_string(),
                ..CiInclude::default()
            }],
            ..MergedCiConfig::default()
        };
        FetchedCiConfig {
            content: ORIGINAL.to_string(),
            original: Some(CiConfig::parse(ORIGINAL).unwrap()),
            merged: Some(CiConfig::parse(MERGED).unwrap()),
            response: Some(response),
        }
    }

    fn create_fake() -> FakeGitLab {
        FakeGitLab {
            config: Some(create_config()),
            include_jobs: HashMap::from([("ci/build.yml".to_string(), vec!["build".to_string()])]),
            group_vars: vec![create_variable("REGISTRY", "registry.example.com")],
            project_vars: vec![create_variable("TAG", "1.4.2")],
            ..FakeGitLab::default()
        }
    }

    /// Both phases back to back, the way the analysis drives them.
    async fn run(resolver: &PipelineResolver<'_>, fake: &FakeGitLab) -> PipelineAnalysis {
        let mut analysis = resolver.resolve_origins(fake).await.unwrap();
        resolver.resolve_images(fake, &mut analysis).await.unwrap();
        analysis
    }

    mod resolve_origins {
        use super::*;

        #[tokio::test]
        async fn missing_configuration_is_limited_without_error() {
            let fake = FakeGitLab::default();
            let project = create_project(true);
            let resolver = PipelineResolver::new(&project, INSTANCE, &LogContext::new("test"));

            let analysis = run(&resolver, &fake).await;

            assert!(analysis.ci_missing, "404 means the configuration is missing");
            assert!(analysis.limited_analysis);
            assert!(analysis.origins.is_empty());
            assert!(analysis.images.is_empty());
        }

        #[tokio::test]
        async fn invalid_configuration_is_limited_and_not_missing() {
            let mut config = create_config();
            if let Some(response) = config.response.as_mut() {
                response.status = "INVALID".to_string();
                response.errors = vec!["jobs:build script can't be blank".to_string()];
            }
            let fake = FakeGitLab {
                config: Some(config),
                ..FakeGitLab::default()
            };
            let project = create_project(true);
            let resolver = PipelineResolver::new(&project, INSTANCE, &LogContext::new("test"));

            let analysis = resolver.resolve_origins(&fake).await.unwrap();

            assert!(analysis.limited_analysis);
            assert!(!analysis.ci_valid);
            assert!(!analysis.ci_missing);
        }

        #[tokio::test]
        async fn archived_project_is_limited() {
            let fake = FakeGitLab {
                config: Some(FetchedCiConfig::default()),
                ..FakeGitLab::default()
            };
            let project = create_project(true);
            let resolver = PipelineResolver::new(&project, INSTANCE, &LogContext::new("test"));

            let analysis = resolver.resolve_origins(&fake).await.unwrap();
            assert!(analysis.limited_analysis);
            assert!(analysis.ci_missing);
        }

        #[tokio::test]
        async fn attributes_jobs_and_survives_catalog_failure() {
            let fake = FakeGitLab {
                catalog_fails: true,
                ..create_fake()
            };
            let project = create_project(true);
            let resolver = PipelineResolver::new(&project, INSTANCE, &LogContext::new("test"));

            let analysis = resolver.resolve_origins(&fake).await.unwrap();

            assert!(analysis.ci_valid);
            assert!(!analysis.limited_analysis);
            assert_eq!(analysis.origins.len(), 2, "One include plus the hardcoded bucket");
            assert_eq!(analysis.origins[0].kind, OriginKind::Local);
            assert_eq!(analysis.origins[0].jobs[0].name, "build");
            let hardcoded = &analysis.origins[1];
            assert_eq!(hardcoded.kind, OriginKind::Hardcoded);
            assert_eq!(
                hardcoded.jobs.iter().map(|j| j.name.as_str()).collect::<Vec<_>>(),
                vec!["lint"]
            );
            assert_eq!(analysis.origin_metrics.job_total, 3);
            assert_eq!(analysis.origin_metrics.origin_local, 1);
        }
    }

    mod resolve_images {
        use super::*;

        #[tokio::test]
        async fn resolves_job_and_default_images() {
            let fake = create_fake();
            let project = create_project(true);
            let resolver = PipelineResolver::new(&project, INSTANCE, &LogContext::new("test"));

            let analysis = run(&resolver, &fake).await;
            let by_job: HashMap<&str, &ResolvedImage> =
                analysis.images.iter().map(|i| (i.job.as_str(), i)).collect();

            let build = by_job["build"];
            assert_eq!(build.registry, "registry.example.com");
            assert_eq!(build.name, "tools/builder");
            assert_eq!(build.tag, "1.4.2", "Project variable wins");
            assert_eq!(build.original, "$REGISTRY/tools/builder:$TAG");

            assert_eq!(by_job["lint"].tag, "20", "Global variable resolves");
            assert_eq!(by_job["notify"].name, "alpine", "Default image applies");
            assert_eq!(by_job["notify"].tag, "3.19");
        }

        #[tokio::test]
        async fn instance_scope_used_for_user_projects_only() {
            let fake = FakeGitLab {
                project_vars: Vec::new(),
                ..create_fake()
            };
            let project = create_project(false);
            let resolver = PipelineResolver::new(&project, INSTANCE, &LogContext::new("test"));

            let analysis = run(&resolver, &fake).await;
            let build = analysis.images.iter().find(|i| i.job == "build").unwrap();
            assert_eq!(build.tag, "from-instance");
        }

        #[tokio::test]
        async fn failing_scope_is_treated_as_empty() {
            let fake = FakeGitLab {
                project_vars: Vec::new(),
                instance_fails: true,
                ..create_fake()
            };
            let project = create_project(false);
            let resolver = PipelineResolver::new(&project, INSTANCE, &LogContext::new("test"));

            let analysis = run(&resolver, &fake).await;
            let build = analysis.images.iter().find(|i| i.job == "build").unwrap();
            assert_eq!(build.tag, "$TAG", "Unresolved token survives");
        }
    }
}
