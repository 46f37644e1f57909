//! Settings validation

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// One finding of a validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub severity: Severity,

    /// Settings object or stochast the message is about
    pub subject: String,

    pub text: String,
}

/// Findings of a validation pass over all settings of a run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub messages: Vec<ValidationMessage>,
}

impl ValidationReport {
    pub fn error(&mut self, subject: &str, text: &str) {
        self.messages.push(ValidationMessage {
            severity: Severity::Error,
            subject: subject.to_string(),
            text: text.to_string(),
        });
    }

    pub fn warning(&mut self, subject: &str, text: &str) {
        self.messages.push(ValidationMessage {
            severity: Severity::Warning,
            subject: subject.to_string(),
            text: text.to_string(),
        });
    }

    /// Add an error unless the condition holds
    pub fn check(&mut self, condition: bool, subject: &str, text: &str) {
        if !condition {
            self.error(subject, text);
        }
    }

    /// Valid when no message has error severity
    pub fn is_valid(&self) -> bool {
        self.messages.iter().all(|m| m.severity != Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationMessage> {
        self.messages.iter().filter(|m| m.severity == Severity::Error)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for message in &self.messages {
            let label = match message.severity {
                Severity::Warning => "warning",
                Severity::Error => "error",
            };
            writeln!(f, "  {}: {}: {}", label, message.subject, message.text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_keep_report_valid() {
        let mut report = ValidationReport::default();
        report.warning("form", "few iterations");
        assert!(report.is_valid());

        report.check(false, "form", "step size must be positive");
        assert!(!report.is_valid());
        assert_eq!(report.errors().count(), 1);
        assert!(report.to_string().contains("error: form: step size must be positive"));
    }
}
