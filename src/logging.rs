use std::fmt::{Display, Write};

use log::Level;

/// Structured logging context handed to each analysis component.
///
/// Fields are rendered after the message as `key=value` pairs so that a single
/// log line carries the project, control and job it relates to.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    fields: Vec<(&'static str, String)>,
}

impl LogContext {
    pub fn new(component: &str) -> Self {
        Self::default().with_field("component", component)
    }

    /// Derive a child context with one more field. Re-using a key replaces it.
    #[must_use]
    pub fn with_field(&self, key: &'static str, value: impl Display) -> Self {
        let mut fields = self.fields.clone();
        let value = value.to_string();
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => fields.push((key, value)),
        }
        Self { fields }
    }

    pub fn render(&self, message: &str) -> String {
        let mut line = message.to_string();
        for (key, value) in &self.fields {
            if value.contains(' ') || value.is_empty() {
                let _ = write!(line, " {key}={value:?}");
            } else {
                let _ = write!(line, " {key}={value}");
            }
        }
        line
    }

    pub fn log(&self, level: Level, message: impl Display) {
        if log::log_enabled!(level) {
            log::log!(level, "{}", self.render(&message.to_string()));
        }
    }

    pub fn debug(&self, message: impl Display) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.log(Level::Error, message);
    }
}
