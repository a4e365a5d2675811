use thiserror::Error;

const MAX_OUTPUT_NAME_CHARS: usize = 128;
const DEFAULT_OUTPUT_STEM: &str = "document";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("source must not be empty")]
    EmptySource,
    #[error("source is {actual} bytes; the limit is {limit} bytes")]
    SourceTooLarge { limit: usize, actual: usize },
    #[error("output name `{0}` contains no usable characters")]
    InvalidOutputName(String),
}

/// A document submitted for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationRequest {
    source: String,
    output_stem: Option<String>,
}

impl CompilationRequest {
    /// Build a request, enforcing the non-empty and size ceiling invariants.
    pub fn new(
        source: impl Into<String>,
        output_name: Option<&str>,
        max_source_bytes: usize,
    ) -> Result<Self, RequestError> {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(RequestError::EmptySource);
        }
        if source.len() > max_source_bytes {
            return Err(RequestError::SourceTooLarge {
                limit: max_source_bytes,
                actual: source.len(),
            });
        }

        let output_stem = match output_name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => Some(sanitize_output_stem(name)?),
            None => None,
        };

        Ok(Self {
            source,
            output_stem,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn output_stem(&self) -> Option<&str> {
        self.output_stem.as_deref()
    }

    /// File name offered to the client for the produced PDF.
    pub fn download_name(&self) -> String {
        format!(
            "{}.pdf",
            self.output_stem.as_deref().unwrap_or(DEFAULT_OUTPUT_STEM)
        )
    }

    pub fn into_source(self) -> String {
        self.source
    }
}

fn sanitize_output_stem(name: &str) -> Result<String, RequestError> {
    let without_extension = name
        .strip_suffix(".pdf")
        .or_else(|| name.strip_suffix(".PDF"))
        .unwrap_or(name);

    let stem: String = without_extension
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        .take(MAX_OUTPUT_NAME_CHARS)
        .collect();
    let stem = stem.trim_matches('.');

    if stem.is_empty() {
        return Err(RequestError::InvalidOutputName(name.to_string()));
    }
    Ok(stem.to_string())
}
