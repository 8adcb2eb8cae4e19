use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::providers::gitlab::types::{AccessLevelEntry, BranchProtection};
use crate::providers::gitlab::wildcard::{matches_any, wildcard_match};

pub const ACCESS_NO_ONE: u32 = 0;
pub const ACCESS_MINIMAL: u32 = 5;
pub const ACCESS_GUEST: u32 = 10;
pub const ACCESS_PLANNER: u32 = 15;
pub const ACCESS_REPORTER: u32 = 20;
pub const ACCESS_DEVELOPER: u32 = 30;
pub const ACCESS_MAINTAINER: u32 = 40;
pub const ACCESS_OWNER: u32 = 50;
pub const ACCESS_ADMIN: u32 = 60;

pub fn access_level_name(level: u32) -> &'static str {
    match level {
        ACCESS_NO_ONE => "No one",
        ACCESS_MINIMAL => "Minimal",
        ACCESS_GUEST => "Guest",
        ACCESS_PLANNER => "Planner",
        ACCESS_REPORTER => "Reporter",
        ACCESS_DEVELOPER => "Developer",
        ACCESS_MAINTAINER => "Maintainer",
        ACCESS_OWNER => "Owner",
        ACCESS_ADMIN => "Admin",
        _ => "Custom",
    }
}

/// Effective protection of one branch once every matching rule is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRequirement {
    pub branch_name: String,
    pub default: bool,
    pub protected: bool,
    /// Pattern of the last rule that matched
    pub protection_pattern: String,
    pub allow_force_push: bool,
    pub code_owner_approval_required: bool,
    pub min_merge_access_level: u32,
    pub min_push_access_level: u32,
    pub merge_access_levels: Vec<AccessLevelEntry>,
    pub push_access_levels: Vec<AccessLevelEntry>,
}

impl BranchRequirement {
    /// Least permissive starting point; matching rules can only relax it.
    fn baseline(branch_name: &str, default: bool) -> Self {
        Self {
            branch_name: branch_name.to_string(),
            default,
            code_owner_approval_required: true,
            ..Self::default()
        }
    }

    fn apply(&mut self, rule: &BranchProtection) {
        self.protected = true;
        self.protection_pattern = rule.pattern.clone();

        if !self.allow_force_push {
            self.allow_force_push = rule.allow_force_push;
        }
        if self.code_owner_approval_required {
            self.code_owner_approval_required = rule.code_owner_approval_required;
        }

        for entry in &rule.merge_access_levels {
            self.merge_access_levels.push(entry.clone());
            self.min_merge_access_level = lower_minimum(self.min_merge_access_level, entry.access_level);
        }
        for entry in &rule.push_access_levels {
            self.push_access_levels.push(entry.clone());
            self.min_push_access_level = lower_minimum(self.min_push_access_level, entry.access_level);
        }
    }
}

fn lower_minimum(current: u32, level: u32) -> u32 {
    if current == ACCESS_NO_ONE || (level != ACCESS_NO_ONE && level < current) {
        level
    } else {
        current
    }
}

/// Branches that must be protected, each with its merged protection posture.
///
/// When several rules match a branch the most permissive setting wins, the
/// way GitLab itself resolves overlapping protections.
pub fn merge_protections(
    branches: &[String],
    rules: &[BranchProtection],
    default_branch: &str,
    name_patterns: &[String],
    default_must_be_protected: bool,
) -> IndexMap<String, BranchRequirement> {
    let mut required = IndexMap::new();

    if default_must_be_protected {
        required.insert(
            default_branch.to_string(),
            BranchRequirement::baseline(default_branch, true),
        );
    }
    for branch in branches {
        if matches_any(branch, name_patterns) && !required.contains_key(branch) {
            required.insert(
                branch.clone(),
                BranchRequirement::baseline(branch, branch == default_branch),
            );
        }
    }

    for requirement in required.values_mut() {
        for rule in rules {
            if wildcard_match(&rule.pattern, &requirement.branch_name) {
                requirement.apply(rule);
            }
        }
    }

    required
}
