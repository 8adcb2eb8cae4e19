use regex::Regex;
use serde::Serialize;

use super::{missing_section, required, ControlReport};
use crate::config::Config;
use crate::error::{PipeguardError, Result};
use crate::logging::LogContext;
use crate::providers::gitlab::image::{ResolvedImage, DOCKER_HUB_REGISTRY, UNKNOWN_REGISTRY};
use crate::providers::gitlab::pipeline::PipelineAnalysis;
use crate::providers::gitlab::wildcard::matches_any;

const VERSION: &str = "0.1.0";
const SECTION: &str = "containerImageMustComeFromAuthorizedSources";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageAuthorization {
    Authorized,
    Unauthorized,
}

/// Flags images pulled from registries outside the trusted list.
#[derive(Debug, Clone)]
pub struct AuthorizedSourcesControl {
    enabled: bool,
    trusted_urls: Vec<String>,
    trust_docker_hub_official_images: bool,
    braced_variable: Regex,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedSourcesMetrics {
    pub total: usize,
    pub authorized: usize,
    pub unauthorized: usize,
    pub ci_invalid: usize,
    pub ci_missing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnauthorizedImageIssue {
    pub link: String,
    pub status: ImageAuthorization,
    pub job: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedSourcesResult {
    pub issues: Vec<UnauthorizedImageIssue>,
    pub metrics: AuthorizedSourcesMetrics,
    pub compliance: f64,
    pub version: &'static str,
    pub ci_valid: bool,
    pub ci_missing: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthorizedSourcesControl {
    /// `enabled` is mandatory; an absent trusted list trusts nothing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let section = config
            .controls
            .container_image_must_come_from_authorized_sources
            .as_ref()
            .ok_or_else(|| missing_section(SECTION))?;

        let braced_variable = Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}")
            .map_err(|e| PipeguardError::Config(e.to_string()))?;

        Ok(Self {
            enabled: required(section.enabled.as_ref(), SECTION, "enabled")?,
            trusted_urls: section.trusted_urls.clone(),
            trust_docker_hub_official_images: section
                .trust_docker_hub_official_images
                .unwrap_or_default(),
            braced_variable,
        })
    }

    /// `${VAR}` and `$VAR` are the same reference.
    fn normalize(&self, text: &str) -> String {
        self.braced_variable.replace_all(text, "$$$1").into_owned()
    }

    pub fn check(&self, image: &ResolvedImage) -> ImageAuthorization {
        let official = self.trust_docker_hub_official_images
            && image.registry == DOCKER_HUB_REGISTRY
            && !image.name.contains('/');

        if self.trusted_urls.is_empty() && !official {
            return ImageAuthorization::Unauthorized;
        }

        let mut url = if image.registry == UNKNOWN_REGISTRY {
            image.name.clone()
        } else {
            format!("{}/{}", image.registry, image.name)
        };
        if !image.tag.is_empty() {
            url.push(':');
            url.push_str(&image.tag);
        }

        let url = url.trim_matches('/');
        if url.is_empty() {
            return ImageAuthorization::Unauthorized;
        }

        let trusted: Vec<String> = self.trusted_urls.iter().map(|p| self.normalize(p)).collect();
        if matches_any(&self.normalize(url), &trusted) || official {
            ImageAuthorization::Authorized
        } else {
            ImageAuthorization::Unauthorized
        }
    }

    pub fn run(&self, analysis: &PipelineAnalysis, ctx: &LogContext) -> AuthorizedSourcesResult {
        let ctx = ctx
            .with_field("control", "authorizedSources")
            .with_field("version", VERSION);

        let mut result = AuthorizedSourcesResult {
            issues: Vec::new(),
            metrics: AuthorizedSourcesMetrics::default(),
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
            match self.check(image) {
                ImageAuthorization::Authorized => result.metrics.authorized += 1,
                status @ ImageAuthorization::Unauthorized => {
                    ctx.with_field("job", &image.job)
                        .with_field("image", &image.link)
                        .debug("Image from an unauthorized source");
                    result.metrics.unauthorized += 1;
                    result.issues.push(UnauthorizedImageIssue {
                        link: image.link.clone(),
                        status,
                        job: image.job.clone(),
                    });
                }
            }
        }

        result.metrics.total = analysis.images.len();
        if !result.issues.is_empty() {
            result.compliance = 0.0;
        }

        ctx.with_field("images", result.metrics.total)
            .with_field("unauthorized", result.metrics.unauthorized)
            .info("Control completed");
        result
    }
}

impl ControlReport for AuthorizedSourcesResult {
    fn title(&self) -> &'static str {
        "Container images must come from authorized sources"
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
