use std::fmt::Display;

use comfy_table::Color as TableColor;
use console::{style, StyledObject};

/// How a compliance score reads on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceBand {
    Compliant,
    Partial,
    Failing,
}

impl ComplianceBand {
    pub fn of(compliance: f64) -> Self {
        if compliance >= 100.0 {
            Self::Compliant
        } else if compliance >= 50.0 {
            Self::Partial
        } else {
            Self::Failing
        }
    }

    pub fn table_color(self) -> TableColor {
        match self {
            Self::Compliant => TableColor::Green,
            Self::Partial => TableColor::Yellow,
            Self::Failing => TableColor::Red,
        }
    }

    fn paint(self, text: String) -> StyledObject<String> {
        let styled = style(text).bright();
        match self {
            Self::Compliant => styled.green(),
            Self::Partial => styled.yellow(),
            Self::Failing => styled.red(),
        }
    }
}

/// `text` colored by the band `compliance` falls into.
pub fn compliance(text: impl Display, compliance: f64) -> StyledObject<String> {
    ComplianceBand::of(compliance).paint(text.to_string())
}

pub fn verdict(passed: bool) -> StyledObject<String> {
    if passed {
        ComplianceBand::Compliant.paint("PASSED ✓".to_string()).bold()
    } else {
        ComplianceBand::Failing.paint("FAILED ✗".to_string()).bold()
    }
}

/// Configuration errors and failed lookups.
pub fn problem(text: impl Display) -> StyledObject<String> {
    ComplianceBand::Failing.paint(text.to_string())
}

/// Issue headings, limited-analysis notices and running phases.
pub fn notice(text: impl Display) -> StyledObject<String> {
    ComplianceBand::Partial.paint(text.to_string())
}

pub fn done(text: impl Display) -> StyledObject<String> {
    ComplianceBand::Compliant.paint(text.to_string())
}

pub fn heading(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().bold()
}

pub fn label(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn project(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn brand(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}
