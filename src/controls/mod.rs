//! Policy controls scoring one project's pipeline and branches.

pub mod authorized_sources;
pub mod branch_protection;
pub mod forbidden_tags;

pub use authorized_sources::{AuthorizedSourcesControl, AuthorizedSourcesResult};
pub use branch_protection::{BranchProtectionControl, BranchProtectionResult, IssueKind};
pub use forbidden_tags::{ForbiddenTagsControl, ForbiddenTagsResult};

use crate::error::{PipeguardError, Result};

/// The part of a control result the summary and the overall score read.
pub trait ControlReport {
    fn title(&self) -> &'static str;

    /// Percentage in `0.0..=100.0`.
    fn compliance(&self) -> f64;

    /// Disabled controls are left out of the overall score.
    fn skipped(&self) -> bool;

    fn issue_count(&self) -> usize;
}

/// Value of a mandatory policy field, or a configuration error naming it.
fn required<T: Clone>(value: Option<&T>, section: &str, field: &str) -> Result<T> {
    value
        .cloned()
        .ok_or_else(|| PipeguardError::Config(format!("{section}.{field} field is required")))
}

fn missing_section(section: &str) -> PipeguardError {
    PipeguardError::Config(format!("{section} control configuration is missing"))
}

/// Mean compliance of the controls that ran; 100 when none did.
pub fn overall_compliance(reports: &[&dyn ControlReport]) -> f64 {
    let scores: Vec<f64> = reports
        .iter()
        .filter(|report| !report.skipped())
        .map(|report| report.compliance())
        .collect();

    if scores.is_empty() {
        return 100.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = scores.len() as f64;
    scores.iter().sum::<f64>() / count
}
