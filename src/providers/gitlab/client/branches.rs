use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;

use super::core::GitLabClient;
use crate::error::Result;
use crate::providers::gitlab::collaborators::{BranchData, BranchSource};
use crate::providers::gitlab::types::{AccessLevelEntry, BranchProtection};

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProtectedBranchResponse {
    name: String,
    #[serde(default)]
    allow_force_push: bool,
    #[serde(default)]
    code_owner_approval_required: bool,
    #[serde(default)]
    push_access_levels: Vec<AccessLevelResponse>,
    #[serde(default)]
    merge_access_levels: Vec<AccessLevelResponse>,
}

#[derive(Debug, Deserialize)]
struct AccessLevelResponse {
    #[serde(default)]
    access_level: Option<u32>,
    #[serde(default)]
    access_level_description: Option<String>,
}

impl From<AccessLevelResponse> for AccessLevelEntry {
    fn from(level: AccessLevelResponse) -> Self {
        Self {
            access_level: level.access_level.unwrap_or_default(),
            access_level_description: level.access_level_description.unwrap_or_default(),
        }
    }
}

impl From<ProtectedBranchResponse> for BranchProtection {
    fn from(rule: ProtectedBranchResponse) -> Self {
        Self {
            pattern: rule.name,
            allow_force_push: rule.allow_force_push,
            code_owner_approval_required: rule.code_owner_approval_required,
            push_access_levels: rule.push_access_levels.into_iter().map(Into::into).collect(),
            merge_access_levels: rule.merge_access_levels.into_iter().map(Into::into).collect(),
        }
    }
}

impl GitLabClient {
    pub async fn fetch_branches(&self, project_path: &str) -> Result<Vec<String>> {
        let url = self.api_endpoint(&["projects", project_path, "repository", "branches"])?;
        let branches: Vec<BranchResponse> = self.get_paginated(&url).await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    pub async fn fetch_branch_protections(&self, project_path: &str) -> Result<Vec<BranchProtection>> {
        let url = self.api_endpoint(&["projects", project_path, "protected_branches"])?;
        let rules: Vec<ProtectedBranchResponse> = self.get_paginated(&url).await?;
        Ok(rules.into_iter().map(BranchProtection::from).collect())
    }
}

#[async_trait]
impl BranchSource for GitLabClient {
    async fn fetch_branch_data(&self, project_path: &str) -> Result<BranchData> {
        let branches = self.fetch_branches(project_path).await?;

        // Reading protections needs maintainer rights; without them every
        // branch simply looks unprotected.
        let protections = match self.fetch_branch_protections(project_path).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Unable to fetch branch protections of {project_path}: {e}");
                Vec::new()
            }
        };

        debug!(
            "Fetched {} branches and {} protection rules for {project_path}",
            branches.len(),
            protections.len()
        );
        Ok(BranchData {
            branches,
            protections,
        })
    }
}
