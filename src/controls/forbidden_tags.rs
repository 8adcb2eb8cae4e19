use serde::Serialize;

use super::{missing_section, required, ControlReport};
use crate::config::Config;
use crate::error::Result;
use crate::logging::LogContext;
use crate::providers::gitlab::pipeline::PipelineAnalysis;
use crate::providers::gitlab::wildcard::matches_any;

const VERSION: &str = "0.2.0";
const SECTION: &str = "containerImageMustNotUseForbiddenTags";

/// Flags images pinned to a mutable tag such as `latest`.
#[derive(Debug, Clone)]
pub struct ForbiddenTagsControl {
    enabled: bool,
    forbidden_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenTagsMetrics {
    pub total: usize,
    pub using_forbidden_tags: usize,
    pub ci_invalid: usize,
    pub ci_missing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForbiddenTagIssue {
    pub link: String,
    pub tag: String,
    pub job: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenTagsResult {
    pub issues: Vec<ForbiddenTagIssue>,
    pub metrics: ForbiddenTagsMetrics,
    pub compliance: f64,
    pub version: &'static str,
    pub ci_valid: bool,
    pub ci_missing: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ForbiddenTagsControl {
    /// Both `enabled` and `tags` must be present in the policy file.
    pub fn from_config(config: &Config) -> Result<Self> {
        let section = config
            .controls
            .container_image_must_not_use_forbidden_tags
            .as_ref()
            .ok_or_else(|| missing_section(SECTION))?;

        Ok(Self {
            enabled: required(section.enabled.as_ref(), SECTION, "enabled")?,
            forbidden_tags: required(section.tags.as_ref(), SECTION, "tags")?,
        })
    }

    pub fn run(&self, analysis: &PipelineAnalysis, ctx: &LogContext) -> ForbiddenTagsResult {
        let ctx = ctx
            .with_field("control", "forbiddenTags")
            .with_field("version", VERSION);

        let mut result = ForbiddenTagsResult {
            issues: Vec::new(),
            metrics: ForbiddenTagsMetrics::default(),
            compliance: 100.0,
            version: VERSION,
            ci_valid: analysis.ci_valid,
            ci_missing: analysis.ci_missing,
            skipped: false,
            error: None,
        };

        if !self.enabled {
            ctx.info("Control disabled, skipping");
            result.skipped = true;
            return result;
        }

        if !analysis.ci_valid || analysis.ci_missing {
            result.compliance = 0.0;
            result.metrics.ci_invalid = usize::from(!analysis.ci_valid);
            result.metrics.ci_missing = usize::from(analysis.ci_missing);
            return result;
        }

        for image in &analysis.images {
            if matches_any(&image.tag, &self.forbidden_tags) {
                result.issues.push(ForbiddenTagIssue {
                    link: image.link.clone(),
                    tag: image.tag.clone(),
                    job: image.job.clone(),
                });
            }
        }

        result.metrics.total = analysis.images.len();
        result.metrics.using_forbidden_tags = result.issues.len();
        if !result.issues.is_empty() {
            result.compliance = 0.0;
        }

        ctx.with_field("images", result.metrics.total)
            .with_field("forbidden", result.metrics.using_forbidden_tags)
            .info("Control completed");
        result
    }
}

impl ControlReport for ForbiddenTagsResult {
    fn title(&self) -> &'static str {
        "Container images must not use forbidden tags"
    }

    fn compliance(&self) -> f64 {
        self.compliance
    }

    fn skipped(&self) -> bool {
        self.skipped
    }

    fn issue_count(&self) -> usize {
        self.issues.len()
    }
}
