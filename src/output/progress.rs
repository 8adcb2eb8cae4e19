use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{done, heading, notice};

const PHASES: usize = 3;

/// Spinner per analysis phase, drawn on stderr.
pub struct PhaseProgress {
    pb: ProgressBar,
    phase: usize,
    visible: bool,
}

impl PhaseProgress {
    /// Hidden progress draws nothing; used for tests and `--no-print` runs.
    pub fn start(visible: bool) -> Self {
        if visible {
            eprintln!("{}  {}", heading("⚙️"), heading("Phases").underlined());
        }
        let pb = create_spinner(visible, phase_message(1, "Resolving pipeline origins"));
        Self {
            pb,
            phase: 1,
            visible,
        }
    }

    fn advance(self, done: &str, next: &str) -> Self {
        self.pb
            .finish_with_message(done_message(self.phase, done));
        let phase = self.phase + 1;
        let pb = create_spinner(self.visible, phase_message(phase, next));
        Self {
            pb,
            phase,
            visible: self.visible,
        }
    }

    pub fn origins_resolved(self) -> Self {
        self.advance("Resolved pipeline origins", "Resolving container images")
    }

    pub fn images_resolved(self) -> Self {
        self.advance("Resolved container images", "Checking branch protection")
    }

    pub fn finish(self) {
        self.pb
            .finish_with_message(done_message(self.phase, "Analysis completed"));
        if self.visible {
            eprintln!();
        }
    }

    /// Stop early, e.g. after a limited analysis.
    pub fn abandon(self, reason: &str) {
        self.pb.abandon_with_message(
            notice(format!("Phase {}/{PHASES}: {reason}", self.phase)).to_string(),
        );
        if self.visible {
            eprintln!();
        }
    }
}

fn phase_message(phase: usize, text: &str) -> String {
    notice(format!("Phase {phase}/{PHASES}: {text}")).to_string()
}

fn done_message(phase: usize, text: &str) -> String {
    done(format!("Phase {phase}/{PHASES}: {text} ✓")).to_string()
}

fn create_spinner(visible: bool, message: String) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
