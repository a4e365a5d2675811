use std::{path::PathBuf, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::domain::{
    diagnostic::{Diagnostic, DiagnosticKind},
    request::RequestError,
};
use crate::infra::error::InfraError;

/// Record of one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePass {
    /// 1-indexed position in the run.
    pub index: u32,
    /// `None` when the process was killed or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

/// Ordered passes of one compilation plus the verdict of the last one inspected.
#[derive(Debug, Clone, Default)]
pub struct EngineRun {
    pub passes: Vec<EnginePass>,
    pub diagnostic: Option<Diagnostic>,
}

impl EngineRun {
    pub fn last_pass(&self) -> Option<&EnginePass> {
        self.passes.last()
    }
}

/// The produced PDF, read fully while the workspace still exists.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub size: u64,
    /// Location inside the workspace; dangling once the workspace is released.
    pub path: PathBuf,
}

/// Successful pipeline result handed to the boundary.
#[derive(Debug, Clone)]
pub struct CompiledDocument {
    pub pdf: Bytes,
    pub file_name: String,
    pub passes: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
    #[error("document rejected: {0}")]
    Validation(Diagnostic),
    #[error("engine reported an error: {0}")]
    Engine(Diagnostic),
    #[error("engine pass timed out: {0}")]
    Timeout(Diagnostic),
    #[error("artifact missing: {0}")]
    ArtifactMissing(Diagnostic),
    #[error(transparent)]
    Internal(#[from] InfraError),
}

impl CompileError {
    /// Route a diagnostic produced by the engine run to its error class.
    pub fn from_engine(diagnostic: Diagnostic) -> Self {
        match diagnostic.kind {
            DiagnosticKind::Timeout => Self::Timeout(diagnostic),
            DiagnosticKind::ArtifactMissing => Self::ArtifactMissing(diagnostic),
            _ => Self::Engine(diagnostic),
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            CompileError::Validation(diagnostic)
            | CompileError::Engine(diagnostic)
            | CompileError::Timeout(diagnostic)
            | CompileError::ArtifactMissing(diagnostic) => Some(diagnostic),
            CompileError::Request(_) | CompileError::Internal(_) => None,
        }
    }

    /// Whether the submitter can fix the failure; the rest are service-side.
    pub fn is_caller_fixable(&self) -> bool {
        match self {
            CompileError::Request(_) | CompileError::Validation(_) => true,
            CompileError::Engine(diagnostic) => diagnostic.kind.is_caller_fixable(),
            CompileError::Timeout(_)
            | CompileError::ArtifactMissing(_)
            | CompileError::Internal(_) => false,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn outcome(&self) -> &'static str {
        match self {
            CompileError::Request(_) => "invalid_request",
            CompileError::Validation(_) => "validation_error",
            CompileError::Engine(_) => "engine_failure",
            CompileError::Timeout(_) => "timeout",
            CompileError::ArtifactMissing(_) => "artifact_missing",
            CompileError::Internal(_) => "internal_error",
        }
    }
}
