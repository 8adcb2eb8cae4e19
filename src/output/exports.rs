use anyhow::Result;
use serde::Serialize;
use std::io::Write;

use crate::analysis::AnalysisResult;

/// Analysis result with the verdict fields added at the top level.
#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    result: &'a AnalysisResult,
    threshold: f64,
    compliance: f64,
    passed: bool,
}

/// Writes the JSON report, one document followed by a newline.
pub fn export_json(
    result: &AnalysisResult,
    threshold: f64,
    pretty: bool,
    output: &mut dyn Write,
) -> Result<()> {
    let compliance = result.compliance();
    let report = JsonReport {
        result,
        threshold,
        compliance,
        passed: compliance >= threshold,
    };

    let json = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    writeln!(output, "{json}")?;
    Ok(())
}
