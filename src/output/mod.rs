mod exports;
mod progress;
mod styling;
mod summary;
mod tables;

pub use exports::export_json;
pub use progress::PhaseProgress;
pub use summary::print_report;

/// Prints the `pipeguard` banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        styling::brand("🛡️ pipeguard"),
        styling::label(env!("CARGO_PKG_VERSION")),
        styling::label("GitLab CI/CD trust policy analyzer")
    );
}
