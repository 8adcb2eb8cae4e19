use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::RetryPolicy;

/// Policy file names looked up in the working directory, in order.
const CANDIDATES: &[&str] = &[
    ".pipeguard.yaml",
    ".pipeguard.yml",
    "pipeguard.yaml",
    "pipeguard.yml",
    "pipeguard.toml",
];

/// Policy file: which controls run and how strict they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub controls: ControlsConfig,

    /// Connection settings for the GitLab instance
    #[serde(default)]
    pub gitlab: Option<GitLabConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image_must_not_use_forbidden_tags: Option<ForbiddenTagsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image_must_come_from_authorized_sources: Option<AuthorizedSourcesConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_must_be_protected: Option<BranchProtectionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenTagsConfig {
    pub enabled: Option<bool>,

    /// Tag patterns, `*` wildcards allowed (e.g. `latest`, `dev-*`)
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedSourcesConfig {
    pub enabled: Option<bool>,

    /// Image URL patterns, e.g. `registry.example.com/*`
    #[serde(default)]
    pub trusted_urls: Vec<String>,

    pub trust_docker_hub_official_images: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProtectionConfig {
    pub enabled: Option<bool>,

    /// Branch name patterns that must be protected
    #[serde(default)]
    pub name_patterns: Vec<String>,

    pub default_must_be_protected: Option<bool>,
    pub allow_force_push: Option<bool>,
    pub code_owner_approval_required: Option<bool>,
    pub min_merge_access_level: Option<u32>,
    pub min_push_access_level: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// Used when `--gitlab-url` is not given
    pub url: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl GitLabConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Config {
    /// Load the policy file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. `.pipeguard.yaml`, `.pipeguard.yml`, `pipeguard.yaml`, `pipeguard.yml`,
    ///    `pipeguard.toml` in the current directory
    /// 3. `<config dir>/pipeguard/config.yaml`
    ///
    /// A policy file is required; finding none is an error. Returns the path
    /// that was loaded alongside the configuration.
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        if let Some(path) = path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Ok((Self::load_from_path(path)?, path.to_path_buf()));
        }

        let cwd = std::env::current_dir().context("Unable to read the current directory")?;
        let user_config = dirs::config_dir().map(|dir| dir.join("pipeguard").join("config.yaml"));

        match Self::find(&cwd, user_config.as_deref()) {
            Some(path) => Ok((Self::load_from_path(&path)?, path)),
            None => bail!(
                "No config file found. Provide one with --config (e.g. .pipeguard.yaml)"
            ),
        }
    }

    fn find(dir: &Path, user_config: Option<&Path>) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|candidate| dir.join(candidate))
            .chain(user_config.map(Path::to_path_buf))
            .find(|path| path.is_file())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            _ => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
        }
    }

    pub fn gitlab(&self) -> GitLabConfig {
        self.gitlab.clone().unwrap_or_default()
    }
}
