use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection, StringRejection},
    },
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::application::compile::CompiledDocument;

use super::{AppState, error::ApiError};

const SERVICE_BANNER: &str = "LaTeX to PDF conversion service is running";

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub latex_content: String,
    #[serde(default)]
    pub output_filename: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct JobQuery {
    #[serde(default)]
    pub output_filename: Option<String>,
}

pub async fn index() -> Json<Value> {
    Json(json!({ "message": SERVICE_BANNER }))
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn convert(
    State(state): State<AppState>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) =
        payload.map_err(|rejection| rejected(rejection.status(), rejection.body_text()))?;
    compile(
        &state,
        payload.latex_content,
        payload.output_filename.as_deref(),
    )
    .await
}

pub async fn job(
    State(state): State<AppState>,
    query: Result<Query<JobQuery>, QueryRejection>,
    body: Result<String, StringRejection>,
) -> Result<Response, ApiError> {
    let Query(query) =
        query.map_err(|rejection| rejected(rejection.status(), rejection.body_text()))?;
    let source = body.map_err(|rejection| rejected(rejection.status(), rejection.body_text()))?;
    compile(&state, source, query.output_filename.as_deref()).await
}

pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", "Resource not found")
}

async fn compile(
    state: &AppState,
    source: String,
    output_name: Option<&str>,
) -> Result<Response, ApiError> {
    let request = state.compiler.request(source, output_name)?;
    let document = state.compiler.compile(request).await?;
    Ok(pdf_response(document))
}

fn pdf_response(document: CompiledDocument) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", document.file_name);
    let mut response = (
        StatusCode::OK,
        [(CONTENT_TYPE, HeaderValue::from_static("application/pdf"))],
        document.pdf,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response.headers_mut().insert(CONTENT_DISPOSITION, value);
    }
    response
}

fn rejected(status: StatusCode, reason: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("request body exceeds the configured size limit")
    } else {
        ApiError::bad_request("request could not be read").with_hint(reason)
    }
}
