use async_trait::async_trait;
use serde_yaml::Mapping;

use crate::error::Result;
use crate::providers::gitlab::ci_yaml::CiConfig;
use crate::providers::gitlab::types::{
    BranchProtection, CatalogResource, CiInclude, CiVariable, MergedCiConfig, ProjectInfo,
};

/// CI configuration of a project, as written and as expanded by GitLab.
///
/// Every part is optional: archived projects yield nothing, and an invalid
/// configuration may come back with a response but no parsed documents.
#[derive(Debug, Clone, Default)]
pub struct FetchedCiConfig {
    /// Raw text of the configuration file
    pub content: String,
    pub original: Option<CiConfig>,
    pub merged: Option<CiConfig>,
    pub response: Option<MergedCiConfig>,
}

/// Branch names of a project and the protection rules configured on it.
#[derive(Debug, Clone, Default)]
pub struct BranchData {
    pub branches: Vec<String>,
    pub protections: Vec<BranchProtection>,
}

/// Source of the original and merged CI configuration.
#[async_trait]
pub trait CiConfigSource: Send + Sync {
    async fn fetch_ci_config(&self, project: &ProjectInfo) -> Result<FetchedCiConfig>;

    /// Names of the jobs a single include contributes once expanded on its own.
    async fn fetch_include_jobs(
        &self,
        include: &CiInclude,
        project_path: &str,
        sha: &str,
        inputs: Option<&Mapping>,
        stages: &[String],
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Catalog resources visible to the project; group projects only see their namespaces.
    async fn fetch_catalog(&self, is_group: bool) -> Result<Vec<CatalogResource>>;
}

#[async_trait]
pub trait VariableSource: Send + Sync {
    async fn instance_variables(&self) -> Result<Vec<CiVariable>>;

    /// Variables inherited from the parent groups, nearest group first.
    async fn group_variables(&self, project_path: &str) -> Result<Vec<CiVariable>>;

    async fn project_variables(&self, project_path: &str) -> Result<Vec<CiVariable>>;
}

#[async_trait]
pub trait BranchSource: Send + Sync {
    async fn fetch_branch_data(&self, project_path: &str) -> Result<BranchData>;
}
