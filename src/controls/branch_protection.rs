use serde::Serialize;

use super::ControlReport;
use crate::config::Config;
use crate::logging::LogContext;
use crate::providers::gitlab::collaborators::BranchData;
use crate::providers::gitlab::protection::{access_level_name, merge_protections};
use crate::providers::gitlab::wildcard::matches_any;

const VERSION: &str = "0.2.0";

/// Checks that the branches named by the policy are protected, and protected strictly enough.
#[derive(Debug, Clone, Default)]
pub struct BranchProtectionControl {
    enabled: bool,
    name_patterns: Vec<String>,
    default_must_be_protected: bool,
    allow_force_push: bool,
    code_owner_approval_required: bool,
    min_merge_access_level: u32,
    min_push_access_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Unprotected,
    NonCompliant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProtectionIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub branch_name: String,
    #[serde(skip_serializing_if = "is_false")]
    pub allow_force_push: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub allow_force_push_display: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub code_owner_approval_required: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub code_owner_approval_required_display: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub min_merge_access_level: u32,
    #[serde(skip_serializing_if = "is_false")]
    pub min_merge_access_level_display: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub authorized_min_merge_access_level: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub min_push_access_level: u32,
    #[serde(skip_serializing_if = "is_false")]
    pub min_push_access_level_display: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub authorized_min_push_access_level: u32,
}

impl BranchProtectionIssue {
    fn unprotected(branch_name: &str) -> Self {
        Self {
            kind: IssueKind::Unprotected,
            branch_name: branch_name.to_string(),
            allow_force_push: false,
            allow_force_push_display: false,
            code_owner_approval_required: false,
            code_owner_approval_required_display: false,
            min_merge_access_level: 0,
            min_merge_access_level_display: false,
            authorized_min_merge_access_level: 0,
            min_push_access_level: 0,
            min_push_access_level_display: false,
            authorized_min_push_access_level: 0,
        }
    }
}

/// Observed posture of one branch that had to be protected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProtectionData {
    pub branch_name: String,
    pub default: bool,
    pub protected: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub allow_force_push: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub code_owner_approval_required: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub min_merge_access_level: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub min_push_access_level: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub authorized_min_merge_access_level: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub authorized_min_push_access_level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProtectionMetrics {
    pub branches: usize,
    pub branches_to_protect: usize,
    pub unprotected_branches: usize,
    pub non_compliant_branches: usize,
    pub total_protected_branches: usize,
    pub projects_correctly_protected: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProtectionResult {
    pub enabled: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub skipped: bool,
    pub compliance: f64,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<BranchProtectionData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BranchProtectionMetrics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<BranchProtectionIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BranchProtectionResult {
    fn skipped() -> Self {
        Self {
            enabled: false,
            skipped: true,
            compliance: 100.0,
            version: VERSION,
            data: Vec::new(),
            metrics: None,
            issues: Vec::new(),
            error: None,
        }
    }

    /// Branch data could not be collected; the control counts as failed.
    pub fn failed(error: impl ToString) -> Self {
        Self {
            enabled: true,
            skipped: false,
            compliance: 0.0,
            error: Some(error.to_string()),
            ..Self::skipped()
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl BranchProtectionControl {
    /// A missing section disables the control.
    pub fn from_config(config: &Config) -> Self {
        let Some(section) = config.controls.branch_must_be_protected.as_ref() else {
            return Self::default();
        };

        Self {
            enabled: section.enabled.unwrap_or_default(),
            name_patterns: section.name_patterns.clone(),
            default_must_be_protected: section.default_must_be_protected.unwrap_or_default(),
            allow_force_push: section.allow_force_push.unwrap_or_default(),
            code_owner_approval_required: section.code_owner_approval_required.unwrap_or_default(),
            min_merge_access_level: section.min_merge_access_level.unwrap_or_default(),
            min_push_access_level: section.min_push_access_level.unwrap_or_default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// An access level breaks the policy when anyone below the authorized minimum may act.
    fn access_too_low(observed: u32, authorized: u32) -> bool {
        observed != 0 && (authorized == 0 || authorized > observed)
    }

    pub fn run(&self, branch_data: &BranchData, default_branch: &str, ctx: &LogContext) -> BranchProtectionResult {
        let ctx = ctx
            .with_field("control", "branchProtection")
            .with_field("version", VERSION);

        if !self.enabled {
            ctx.info("Control disabled, skipping");
            return BranchProtectionResult::skipped();
        }

        let requirements = if branch_data.branches.is_empty() {
            Default::default()
        } else {
            merge_protections(
                &branch_data.branches,
                &branch_data.protections,
                default_branch,
                &self.name_patterns,
                self.default_must_be_protected,
            )
        };

        let mut data = Vec::new();
        let mut issues = Vec::new();
        let mut metrics = BranchProtectionMetrics {
            branches: branch_data.branches.len(),
            branches_to_protect: requirements.len(),
            ..BranchProtectionMetrics::default()
        };

        for branch in requirements.values() {
            let mut observed = BranchProtectionData {
                branch_name: branch.branch_name.clone(),
                default: branch.default,
                protected: branch.protected,
                ..BranchProtectionData::default()
            };

            if !branch.protected {
                metrics.unprotected_branches += 1;
                issues.push(BranchProtectionIssue::unprotected(&branch.branch_name));
                data.push(observed);
                continue;
            }

            metrics.total_protected_branches += 1;

            let in_scope = matches_any(&branch.branch_name, &self.name_patterns)
                || (self.default_must_be_protected && branch.default);
            if !in_scope {
                continue;
            }

            let issue = BranchProtectionIssue {
                kind: IssueKind::NonCompliant,
                branch_name: branch.branch_name.clone(),
                allow_force_push: branch.allow_force_push,
                allow_force_push_display: !self.allow_force_push && branch.allow_force_push,
                code_owner_approval_required: branch.code_owner_approval_required,
                code_owner_approval_required_display: self.code_owner_approval_required
                    && !branch.code_owner_approval_required,
                min_merge_access_level: branch.min_merge_access_level,
                min_merge_access_level_display: Self::access_too_low(
                    branch.min_merge_access_level,
                    self.min_merge_access_level,
                ),
                authorized_min_merge_access_level: self.min_merge_access_level,
                min_push_access_level: branch.min_push_access_level,
                min_push_access_level_display: Self::access_too_low(
                    branch.min_push_access_level,
                    self.min_push_access_level,
                ),
                authorized_min_push_access_level: self.min_push_access_level,
            };

            let violated = issue.allow_force_push_display
                || issue.code_owner_approval_required_display
                || issue.min_merge_access_level_display
                || issue.min_push_access_level_display;

            if violated {
                metrics.non_compliant_branches += 1;
                observed.allow_force_push = issue.allow_force_push;
                observed.code_owner_approval_required = issue.code_owner_approval_required;
                observed.min_merge_access_level = issue.min_merge_access_level;
                observed.min_push_access_level = issue.min_push_access_level;
                observed.authorized_min_merge_access_level = issue.authorized_min_merge_access_level;
                observed.authorized_min_push_access_level = issue.authorized_min_push_access_level;
                ctx.with_field("branch", &branch.branch_name)
                    .with_field("merge", access_level_name(branch.min_merge_access_level))
                    .with_field("push", access_level_name(branch.min_push_access_level))
                    .debug("Branch protection is not compliant");
                issues.push(issue);
            }
            data.push(observed);
        }

        if metrics.unprotected_branches == 0
            && metrics.non_compliant_branches == 0
            && metrics.branches_to_protect > 0
        {
            metrics.projects_correctly_protected = 1;
        }

        let compliance = if issues.is_empty() { 100.0 } else { 0.0 };
        ctx.with_field("branchesToProtect", metrics.branches_to_protect)
            .with_field("issues", issues.len())
            .info("Control completed");

        BranchProtectionResult {
            enabled: true,
            skipped: false,
            compliance,
            version: VERSION,
            data,
            metrics: Some(metrics),
            issues,
            error: None,
        }
    }
}

impl ControlReport for BranchProtectionResult {
    fn title(&self) -> &'static str {
        "Branches must be protected"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BranchProtectionConfig;
    use crate::providers::gitlab::types::{AccessLevelEntry, BranchProtection};

    fn create_control(section: BranchProtectionConfig) -> BranchProtectionControl {
        let mut config = Config::default();
        config.controls.branch_must_be_protected = Some(section);
        BranchProtectionControl::from_config(&config)
    }

    fn create_rule(pattern: &str, force: bool, code_owner: bool, merge: u32, push: u32) -> BranchProtection {
        let level = |access_level| AccessLevelEntry {
            access_level,
            access_level_description: String::new(),
        };
        BranchProtection {
            pattern: pattern.to_string(),
            allow_force_push: force,
            code_owner_approval_required: code_owner,
            merge_access_levels: vec![level(merge)],
            push_access_levels: vec![level(push)],
        }
    }

    fn create_data(branches: &[&str], protections: Vec<BranchProtection>) -> BranchData {
        BranchData {
            branches: branches.iter().map(|s| s.to_string()).collect(),
            protections,
        }
    }

    fn strict_policy() -> BranchProtectionConfig {
        BranchProtectionConfig {
            enabled: Some(true),
            name_patterns: vec!["release/*".to_string()],
            default_must_be_protected: Some(true),
            allow_force_push: Some(false),
            code_owner_approval_required: Some(true),
            min_merge_access_level: Some(30),
            min_push_access_level: Some(40),
        }
    }

    #[test]
    fn missing_section_disables_control() {
        let control = BranchProtectionControl::from_config(&Config::default());
        let result = control.run(&create_data(&["main"], Vec::new()), "main", &LogContext::default());

        assert!(!control.enabled());
        assert!(result.skipped);
        assert!(!result.enabled);
        assert!((result.compliance - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unprotected_branches_are_issues() {
        let control = create_control(strict_policy());
        let data = create_data(&["main", "release/1.0", "feature/x"], Vec::new());

        let result = control.run(&data, "main", &LogContext::default());

        let names: Vec<&str> = result.issues.iter().map(|i| i.branch_name.as_str()).collect();
        assert_eq!(names, vec!["main", "release/1.0"]);
        assert!(result.issues.iter().all(|i| i.kind == IssueKind::Unprotected));
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.branches, 3);
        assert_eq!(metrics.branches_to_protect, 2);
        assert_eq!(metrics.unprotected_branches, 2);
        assert_eq!(metrics.projects_correctly_protected, 0);
        assert!(result.compliance.abs() < f64::EPSILON);
    }

    #[test]
    fn compliant_protection_passes() {
        let control = create_control(strict_policy());
        let data = create_data(&["main"], vec![create_rule("main", false, true, 40, 40)]);

        let result = control.run(&data, "main", &LogContext::default());

        assert!(result.issues.is_empty(), "Got issues {:?}", result.issues);
        assert_eq!(result.data.len(), 1);
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.total_protected_branches, 1);
        assert_eq!(metrics.projects_correctly_protected, 1);
        assert!((result.compliance - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weak_protection_is_non_compliant() {
        let control = create_control(strict_policy());
        let data = create_data(&["main"], vec![create_rule("main", true, false, 30, 30)]);

        let result = control.run(&data, "main", &LogContext::default());

        assert_eq!(result.issues.len(), 1);
        let issue = &result.issues[0];
        assert_eq!(issue.kind, IssueKind::NonCompliant);
        assert!(issue.allow_force_push_display);
        assert!(issue.code_owner_approval_required_display);
        assert!(!issue.min_merge_access_level_display, "Developer merge meets a Developer minimum");
        assert!(issue.min_push_access_level_display);
        assert_eq!(issue.min_push_access_level, 30);
        assert_eq!(issue.authorized_min_push_access_level, 40);
        assert_eq!(result.metrics.unwrap().non_compliant_branches, 1);
    }

    #[test]
    fn unset_minimum_flags_any_access() {
        let control = create_control(BranchProtectionConfig {
            enabled: Some(true),
            default_must_be_protected: Some(true),
            ..BranchProtectionConfig::default()
        });
        let data = create_data(&["main"], vec![create_rule("main", false, false, 40, 0)]);

        let result = control.run(&data, "main", &LogContext::default());

        let issue = &result.issues[0];
        assert!(issue.min_merge_access_level_display);
        assert!(!issue.min_push_access_level_display, "No one may push, nothing to flag");
        assert!(!issue.code_owner_approval_required_display);
    }

    #[test]
    fn no_branches_means_nothing_to_protect() {
        let control = create_control(strict_policy());

        let result = control.run(&create_data(&[], Vec::new()), "main", &LogContext::default());

        assert!(result.issues.is_empty());
        assert_eq!(result.metrics.unwrap().branches_to_protect, 0);
        assert!((result.compliance - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failed_result_serializes_error() {
        let result = BranchProtectionResult::failed("Project not found: group/app");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["enabled"], true);
        assert_eq!(json["compliance"], 0.0);
        assert_eq!(json["error"], "Project not found: group/app");
        assert!(json.get("skipped").is_none());
        assert!(json.get("issues").is_none());
    }

    #[test]
    fn issue_type_is_snake_case() {
        let json = serde_json::to_value(BranchProtectionIssue::unprotected("main")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "unprotected", "branchName": "main"}));
    }
}
