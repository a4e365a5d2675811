use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::compile::CompileError;
use crate::application::error::ErrorReport;
use crate::domain::diagnostic::DiagnosticKind;
use crate::domain::request::RequestError;

const REPORT_SOURCE: &str = "infra::http::error";

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const EMPTY_SOURCE: &str = "empty_source";
    pub const SOURCE_TOO_LARGE: &str = "source_too_large";
    pub const INVALID_OUTPUT_NAME: &str = "invalid_output_name";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    line: Option<u32>,
    hint: Option<String>,
    /// Operator-facing detail; never sent to the client.
    report: ErrorReport,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            code,
            report: ErrorReport::from_message(REPORT_SOURCE, status, format!("{code}: {message}")),
            message,
            line: None,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::SOURCE_TOO_LARGE,
            message,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<CompileError> for ApiError {
    fn from(err: CompileError) -> Self {
        let mut api = match &err {
            CompileError::Request(request) => match request {
                RequestError::EmptySource => Self::new(
                    StatusCode::BAD_REQUEST,
                    codes::EMPTY_SOURCE,
                    request.to_string(),
                ),
                RequestError::SourceTooLarge { .. } => Self::payload_too_large(request.to_string()),
                RequestError::InvalidOutputName(_) => Self::new(
                    StatusCode::BAD_REQUEST,
                    codes::INVALID_OUTPUT_NAME,
                    request.to_string(),
                )
                .with_hint("use letters, digits, `.`, `_` or `-`"),
            },
            CompileError::Internal(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INTERNAL,
                "Internal server error",
            ),
            CompileError::Validation(diagnostic)
            | CompileError::Engine(diagnostic)
            | CompileError::Timeout(diagnostic)
            | CompileError::ArtifactMissing(diagnostic) => {
                let status = match &err {
                    CompileError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    CompileError::ArtifactMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                let mut api = Self::new(status, diagnostic.kind.as_str(), &diagnostic.message);
                api.line = diagnostic.line;
                api.hint = hint_for(diagnostic.kind).map(str::to_string);
                api
            }
        };
        api.report = ErrorReport::from_error(REPORT_SOURCE, api.status, &err);
        api
    }
}

fn hint_for(kind: DiagnosticKind) -> Option<&'static str> {
    match kind {
        DiagnosticKind::SyntaxError => Some(
            "check the command or character near the reported line; escape literal special characters",
        ),
        DiagnosticKind::MissingDelimiter => {
            Some("close every `$`, `{` and environment opened near the reported line")
        }
        DiagnosticKind::StructuralError => {
            Some("include \\documentclass and a matching \\begin{document} ... \\end{document} pair")
        }
        DiagnosticKind::EngineCrash => {
            Some("the engine stopped unexpectedly; inspect the document near the reported line")
        }
        DiagnosticKind::Timeout => Some("simplify the document or split it into smaller parts"),
        DiagnosticKind::ArtifactMissing => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                line: self.line,
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}
