//! LaTeX to PDF pipeline: normalize, validate, typeset in an isolated workspace, collect the PDF.

mod artifact;
mod classify;
mod engine;
mod normalize;
mod types;
mod validate;
mod verbatim;
mod workspace;

use std::{
    num::NonZeroU32,
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::CompileSettings;
use crate::domain::request::CompilationRequest;
use crate::infra::error::InfraError;

pub use artifact::resolve as resolve_artifact;
pub use classify::classify;
pub use engine::{EngineInvoker, EngineOutput, ProcessEngine, TypesetEngine};
pub use normalize::normalize;
pub use types::{Artifact, CompileError, CompiledDocument, EnginePass, EngineRun};
pub use validate::validate;
pub use workspace::{Workspace, with_workspace};

pub const METRIC_COMPILE_TOTAL: &str = "texpress_compile_total";
pub const METRIC_COMPILE_MS: &str = "texpress_compile_ms";
pub const METRIC_ENGINE_PASSES: &str = "texpress_engine_passes";

/// Every request is written to the same name inside its own workspace.
const SOURCE_BASENAME: &str = "input";
const SOURCE_FILE_NAME: &str = "input.tex";

/// Runs compilation requests against one engine with bounded concurrency.
pub struct CompileService {
    settings: CompileSettings,
    invoker: EngineInvoker,
    permits: Semaphore,
}

impl CompileService {
    pub fn new(settings: CompileSettings, engine: Arc<dyn TypesetEngine>) -> Self {
        let invoker = EngineInvoker::new(engine, settings.pass_timeout);
        let permits = Semaphore::new(settings.max_concurrency.get());
        Self {
            settings,
            invoker,
            permits,
        }
    }

    /// Service backed by the engine binary named in `settings`.
    pub fn with_process_engine(settings: CompileSettings) -> Self {
        let engine = Arc::new(ProcessEngine::new(settings.engine_path.clone()));
        Self::new(settings, engine)
    }

    pub fn settings(&self) -> &CompileSettings {
        &self.settings
    }

    /// Build a request using this service's source size ceiling.
    pub fn request(
        &self,
        source: impl Into<String>,
        output_name: Option<&str>,
    ) -> Result<CompilationRequest, CompileError> {
        CompilationRequest::new(source, output_name, self.settings.max_source_bytes.get())
            .map_err(CompileError::from)
    }

    pub async fn compile(
        &self,
        request: CompilationRequest,
    ) -> Result<CompiledDocument, CompileError> {
        let span = info_span!(
            "compile",
            source_bytes = request.source().len(),
            preprocessing = self.settings.preprocessing_enabled,
        );
        let started_at = Instant::now();
        let result = self.run(request, started_at).instrument(span.clone()).await;
        let elapsed = started_at.elapsed();

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.outcome(),
        };
        counter!(METRIC_COMPILE_TOTAL, "outcome" => outcome).increment(1);
        histogram!(METRIC_COMPILE_MS, "outcome" => outcome).record(elapsed.as_secs_f64() * 1000.0);

        span.in_scope(|| match &result {
            Ok(document) => info!(
                target = "application::compile",
                op = "compile",
                result = "ok",
                passes = document.passes,
                pdf_bytes = document.pdf.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Compilation succeeded"
            ),
            Err(err) => report_failure(err, elapsed),
        });

        result
    }

    async fn run(
        &self,
        request: CompilationRequest,
        started_at: Instant,
    ) -> Result<CompiledDocument, CompileError> {
        let file_name = request.download_name();
        let source = if self.settings.preprocessing_enabled {
            normalize(request.source())
        } else {
            request.into_source()
        };

        validate(&source).map_err(CompileError::Validation)?;

        let _permit = self.permits.acquire().await.map_err(InfraError::from)?;

        let invoker = self.invoker.clone();
        let max_passes = self.settings.max_passes;
        let (passes, artifact) = with_workspace(&self.settings.workspace_root, |workspace| {
            typeset(invoker, workspace, source, max_passes)
        })
        .await?;

        Ok(CompiledDocument {
            pdf: artifact.bytes,
            file_name,
            passes,
            elapsed: started_at.elapsed(),
        })
    }
}

/// Engine passes plus artifact lookup; runs entirely inside one workspace.
async fn typeset(
    invoker: EngineInvoker,
    workspace: Workspace,
    source: String,
    max_passes: NonZeroU32,
) -> Result<(usize, Artifact), CompileError> {
    let run = invoker
        .compile(&workspace, SOURCE_FILE_NAME, &source, max_passes)
        .await?;
    histogram!(METRIC_ENGINE_PASSES).record(run.passes.len() as f64);

    if let Some(diagnostic) = run.diagnostic.clone() {
        let err = CompileError::from_engine(diagnostic);
        log_engine_output(&run, &err);
        return Err(err);
    }

    match artifact::resolve(&workspace, SOURCE_BASENAME).await {
        Ok(artifact) => Ok((run.passes.len(), artifact)),
        Err(diagnostic) => {
            let err = CompileError::ArtifactMissing(diagnostic);
            log_engine_output(&run, &err);
            Err(err)
        }
    }
}

fn report_failure(err: &CompileError, elapsed: Duration) {
    let line = err
        .diagnostic()
        .and_then(|diagnostic| diagnostic.line)
        .map(i64::from)
        .unwrap_or(-1);
    if err.is_caller_fixable() {
        warn!(
            target = "application::compile",
            op = "compile",
            result = err.outcome(),
            line,
            elapsed_ms = elapsed.as_millis() as u64,
            error = %err,
            "Compilation rejected"
        );
    } else {
        error!(
            target = "application::compile",
            op = "compile",
            result = err.outcome(),
            elapsed_ms = elapsed.as_millis() as u64,
            error = %err,
            "Compilation failed"
        );
    }
}

/// Service-side failures keep the full output of the last pass for operators.
fn log_engine_output(run: &EngineRun, err: &CompileError) {
    if err.is_caller_fixable() {
        return;
    }
    let Some(pass) = run.last_pass() else {
        return;
    };
    error!(
        target = "application::compile",
        op = "compile::engine_output",
        result = err.outcome(),
        pass = pass.index,
        exit_code = pass.exit_code.map(i64::from).unwrap_or(-1),
        timed_out = pass.timed_out,
        stdout = %pass.stdout,
        stderr = %pass.stderr,
        "Engine output for failed compilation"
    );
}
