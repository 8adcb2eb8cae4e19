use std::fmt::Write;

use comfy_table::{Cell, Color as TableColor};

use crate::analysis::AnalysisResult;
use crate::controls::{
    AuthorizedSourcesResult, BranchProtectionResult, ControlReport, ForbiddenTagsResult, IssueKind,
};

use super::styling::{compliance as compliance_style, heading, label, notice, problem, project, verdict};
use super::tables::{color_coded_compliance_cell, create_cyan_header, create_table};

const RULE_WIDTH: usize = 60;

/// Prints the human-readable report to stdout.
///
/// One section per control (metrics and issues), then a summary with the
/// pass/fail status, an issue count table and a compliance table.
pub fn print_report(result: &AnalysisResult, threshold: f64) {
    println!("{}", render_report(result, threshold));
}

fn add_rule(output: &mut String) {
    let _ = writeln!(output, "{}", label("─".repeat(RULE_WIDTH)));
}

fn add_control_header(output: &mut String, report: &dyn ControlReport) {
    add_rule(output);
    let title = heading(report.title());
    if report.skipped() {
        let _ = writeln!(output, "{title} {}", label("(skipped)"));
    } else {
        let _ = writeln!(output, "{title} {}", compliance_text(report.compliance()));
    }
    add_rule(output);
}

fn compliance_text(compliance: f64) -> String {
    compliance_style(format!("({compliance:.1}% compliant)"), compliance).to_string()
}

fn add_skipped(output: &mut String) {
    let _ = writeln!(output, "  {}", label("Status: SKIPPED (disabled in configuration)"));
}

fn add_ci_status(output: &mut String, ci_valid: bool, ci_missing: bool) {
    if ci_missing {
        let _ = writeln!(output, "  {}", problem("CI configuration is missing"));
    } else if !ci_valid {
        let _ = writeln!(output, "  {}", problem("CI configuration is invalid"));
    }
}

fn add_issue_heading(output: &mut String, heading: &str) {
    let _ = writeln!(output, "\n  {}", notice(heading));
}

fn bullet() -> String {
    notice("•").to_string()
}

fn render_forbidden_tags(output: &mut String, result: &ForbiddenTagsResult) {
    add_control_header(output, result);
    if result.skipped {
        add_skipped(output);
    } else {
        add_ci_status(output, result.ci_valid, result.ci_missing);
        let _ = writeln!(output, "  {} {}", label("Total Images:"), result.metrics.total);
        let _ = writeln!(
            output,
            "  {} {}",
            label("Using Forbidden Tags:"),
            result.metrics.using_forbidden_tags
        );
        if !result.issues.is_empty() {
            add_issue_heading(output, "Forbidden Tags Found:");
            for issue in &result.issues {
                let _ = writeln!(
                    output,
                    "    {} Job '{}' uses forbidden tag '{}' (image: {})",
                    bullet(),
                    issue.job,
                    issue.tag,
                    issue.link
                );
            }
        }
    }
    output.push('\n');
}

fn render_authorized_sources(output: &mut String, result: &AuthorizedSourcesResult) {
    add_control_header(output, result);
    if result.skipped {
        add_skipped(output);
    } else {
        add_ci_status(output, result.ci_valid, result.ci_missing);
        let _ = writeln!(output, "  {} {}", label("Total Images:"), result.metrics.total);
        let _ = writeln!(output, "  {} {}", label("Authorized:"), result.metrics.authorized);
        let _ = writeln!(output, "  {} {}", label("Unauthorized:"), result.metrics.unauthorized);
        if !result.issues.is_empty() {
            add_issue_heading(output, "Unauthorized Images Found:");
            for issue in &result.issues {
                let _ = writeln!(
                    output,
                    "    {} Job '{}' uses unauthorized image: {}",
                    bullet(),
                    issue.job,
                    issue.link
                );
            }
        }
    }
    output.push('\n');
}

fn render_branch_protection(output: &mut String, result: &BranchProtectionResult) {
    add_control_header(output, result);
    if result.skipped {
        add_skipped(output);
        output.push('\n');
        return;
    }

    if let Some(error) = &result.error {
        let _ = writeln!(output, "  {} {}", problem("Error:"), error);
    }
    if let Some(metrics) = &result.metrics {
        let _ = writeln!(output, "  {} {}", label("Total Branches:"), metrics.branches);
        let _ = writeln!(output, "  {} {}", label("Branches to Protect:"), metrics.branches_to_protect);
        let _ = writeln!(output, "  {} {}", label("Protected Branches:"), metrics.total_protected_branches);
        let _ = writeln!(output, "  {} {}", label("Unprotected:"), metrics.unprotected_branches);
        let _ = writeln!(output, "  {} {}", label("Non-Compliant:"), metrics.non_compliant_branches);
    }

    if !result.issues.is_empty() {
        add_issue_heading(output, "Issues Found:");
        for issue in &result.issues {
            match issue.kind {
                IssueKind::Unprotected => {
                    let _ = writeln!(
                        output,
                        "    {} Branch '{}' is not protected",
                        bullet(),
                        issue.branch_name
                    );
                }
                IssueKind::NonCompliant => {
                    let _ = writeln!(
                        output,
                        "    {} Branch '{}' has non-compliant protection settings",
                        bullet(),
                        issue.branch_name
                    );
                    if issue.allow_force_push_display {
                        let _ = writeln!(output, "      └─ Force push is allowed (should be disabled)");
                    }
                    if issue.code_owner_approval_required_display {
                        let _ = writeln!(output, "      └─ Code owner approval is not required");
                    }
                    if issue.min_merge_access_level_display {
                        let _ = writeln!(
                            output,
                            "      └─ Merge access level is too low ({}, minimum: {})",
                            issue.min_merge_access_level, issue.authorized_min_merge_access_level
                        );
                    }
                    if issue.min_push_access_level_display {
                        let _ = writeln!(
                            output,
                            "      └─ Push access level is too low ({}, minimum: {})",
                            issue.min_push_access_level, issue.authorized_min_push_access_level
                        );
                    }
                }
            }
        }
    }
    output.push('\n');
}

fn render_summary_tables(output: &mut String, reports: &[&dyn ControlReport], compliance: f64) {
    let mut issues_table = create_table();
    issues_table.set_header(create_cyan_header(&["Control", "Issues"]));
    for report in reports {
        let issues = if report.skipped() {
            Cell::new("-").fg(TableColor::DarkGrey)
        } else if report.issue_count() == 0 {
            Cell::new(0).fg(TableColor::Green)
        } else {
            Cell::new(report.issue_count()).fg(TableColor::Red)
        };
        issues_table.add_row(vec![Cell::new(report.title()), issues]);
    }
    let _ = writeln!(output, "  {}", heading("Issues"));
    let _ = writeln!(output, "{issues_table}\n");

    let mut compliance_table = create_table();
    compliance_table.set_header(create_cyan_header(&["Control", "Compliance"]));
    for report in reports {
        let cell = if report.skipped() {
            Cell::new("skipped").fg(TableColor::DarkGrey)
        } else {
            color_coded_compliance_cell(report.compliance())
        };
        compliance_table.add_row(vec![Cell::new(report.title()), cell]);
    }
    compliance_table.add_row(vec![
        Cell::new("Overall").fg(TableColor::Cyan),
        color_coded_compliance_cell(compliance),
    ]);
    let _ = writeln!(output, "  {}", heading("Compliance"));
    let _ = writeln!(output, "{compliance_table}");
}

fn render_report(result: &AnalysisResult, threshold: f64) -> String {
    let mut output = String::new();
    let compliance = result.compliance();

    let _ = writeln!(output, "\n{} {}", heading("Project:"), project(&result.project_path));
    let _ = writeln!(
        output,
        "{} {}\n",
        label("Analyzed at:"),
        label(result.analyzed_at.format("%Y-%m-%d %H:%M UTC"))
    );
    if result.limited_analysis {
        let _ = writeln!(
            output,
            "{}\n",
            notice("Limited analysis: the CI configuration could not be used")
        );
    }

    if let Some(forbidden_tags) = &result.forbidden_tags {
        render_forbidden_tags(&mut output, forbidden_tags);
    }
    if let Some(authorized_sources) = &result.authorized_sources {
        render_authorized_sources(&mut output, authorized_sources);
    }
    if let Some(branch_protection) = &result.branch_protection {
        render_branch_protection(&mut output, branch_protection);
    }

    add_rule(&mut output);
    let _ = writeln!(output, "{}", heading("Summary"));
    add_rule(&mut output);
    let status = verdict(compliance >= threshold);
    let _ = writeln!(output, "  Status: {status}");
    let _ = writeln!(
        output,
        "  {} {compliance:.1}% {}\n",
        label("Compliance:"),
        label(format!("(threshold {threshold:.1}%)"))
    );

    render_summary_tables(&mut output, &result.reports(), compliance);
    output
}
