use std::fmt;

use serde::{Deserialize, Serialize};

/// Classified failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    SyntaxError,
    MissingDelimiter,
    StructuralError,
    EngineCrash,
    ArtifactMissing,
    Timeout,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::SyntaxError => "syntax_error",
            DiagnosticKind::MissingDelimiter => "missing_delimiter",
            DiagnosticKind::StructuralError => "structural_error",
            DiagnosticKind::EngineCrash => "engine_crash",
            DiagnosticKind::ArtifactMissing => "artifact_missing",
            DiagnosticKind::Timeout => "timeout",
        }
    }

    /// Errors that another engine pass cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiagnosticKind::SyntaxError
                | DiagnosticKind::MissingDelimiter
                | DiagnosticKind::StructuralError
                | DiagnosticKind::Timeout
        )
    }

    /// Whether the submitter can fix the failure by editing the document.
    pub fn is_caller_fixable(&self) -> bool {
        matches!(
            self,
            DiagnosticKind::SyntaxError
                | DiagnosticKind::MissingDelimiter
                | DiagnosticKind::StructuralError
                | DiagnosticKind::EngineCrash
        )
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of why a document could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// 1-indexed line in the submitted source, when the engine reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::SyntaxError, message)
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::StructuralError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Timeout, message)
    }

    pub fn artifact_missing(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::ArtifactMissing, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {line}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_exclude_engine_crash() {
        assert!(DiagnosticKind::MissingDelimiter.is_fatal());
        assert!(DiagnosticKind::Timeout.is_fatal());
        assert!(!DiagnosticKind::EngineCrash.is_fatal());
    }

    #[test]
    fn service_side_kinds_are_not_caller_fixable() {
        assert!(!DiagnosticKind::Timeout.is_caller_fixable());
        assert!(!DiagnosticKind::ArtifactMissing.is_caller_fixable());
        assert!(DiagnosticKind::EngineCrash.is_caller_fixable());
    }

    #[test]
    fn serializes_kind_as_snake_case() {
        let diagnostic = Diagnostic::syntax("unescaped `%`").at_line(Some(4));
        let json = serde_json::to_value(&diagnostic).expect("serialize diagnostic");
        assert_eq!(json["kind"], "syntax_error");
        assert_eq!(json["line"], 4);
    }

    #[test]
    fn display_includes_line_when_known() {
        let diagnostic = Diagnostic::structural("missing \\documentclass");
        assert_eq!(
            diagnostic.to_string(),
            "structural_error: missing \\documentclass"
        );
        let located = diagnostic.at_line(Some(7));
        assert_eq!(
            located.to_string(),
            "structural_error (line 7): missing \\documentclass"
        );
    }
}
