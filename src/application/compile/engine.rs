use std::{
    ffi::OsString,
    io::ErrorKind,
    num::NonZeroU32,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::diagnostic::Diagnostic;
use crate::infra::error::InfraError;

use super::classify::classify;
use super::types::{EnginePass, EngineRun};
use super::workspace::Workspace;

/// Extra time an engine gets past its deadline before the invoker abandons it.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

const PIPE_CHUNK_BYTES: usize = 8 * 1024;

/// Captured result of a single engine process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The process was killed at its deadline; streams hold what it wrote until then.
    pub timed_out: bool,
}

/// Something that can typeset `source` inside `workdir` once.
///
/// Implementations stop work once `deadline` has elapsed and report
/// `timed_out` along with whatever output they captured.
#[async_trait]
pub trait TypesetEngine: Send + Sync {
    async fn run(
        &self,
        workdir: &Path,
        source: &Path,
        deadline: Duration,
    ) -> Result<EngineOutput, InfraError>;
}

/// Runs a pdfTeX-compatible binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl TypesetEngine for ProcessEngine {
    async fn run(
        &self,
        workdir: &Path,
        source: &Path,
        deadline: Duration,
    ) -> Result<EngineOutput, InfraError> {
        let mut output_directory = OsString::from("-output-directory=");
        output_directory.push(workdir.as_os_str());

        // Dropping the child (cancellation) kills the process.
        let mut child = Command::new(&self.program)
            .arg("-interaction=nonstopmode")
            .arg(output_directory)
            .arg(source)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                warn!(
                    target = "application::compile::engine",
                    op = "engine::spawn",
                    result = "error",
                    program = %self.program.display(),
                    error = %err,
                    "Failed to spawn typesetting engine"
                );
                if err.kind() == ErrorKind::NotFound {
                    InfraError::engine_unavailable(format!(
                        "{}: {err}",
                        self.program.display()
                    ))
                } else {
                    InfraError::Io(err)
                }
            })?;

        let (Some(mut stdout_pipe), Some(mut stderr_pipe)) =
            (child.stdout.take(), child.stderr.take())
        else {
            return Err(InfraError::Io(std::io::Error::other(
                "engine output streams were not captured",
            )));
        };

        // Streams are drained while waiting so output written before a kill survives.
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let finished = tokio::time::timeout(deadline, async {
            let (status, stdout_read, stderr_read) = tokio::join!(
                child.wait(),
                drain(&mut stdout_pipe, &mut stdout),
                drain(&mut stderr_pipe, &mut stderr),
            );
            stdout_read?;
            stderr_read?;
            status
        })
        .await;

        let (exit_code, timed_out) = match finished {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!(
                        target = "application::compile::engine",
                        op = "engine::kill",
                        result = "error",
                        error = %err,
                        "Failed to kill timed-out typesetting engine"
                    );
                }
                (None, true)
            }
        };

        Ok(EngineOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
        })
    }
}

/// Append everything readable from `pipe` to `sink`, chunk by chunk.
async fn drain<R>(pipe: &mut R, sink: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; PIPE_CHUNK_BYTES];
    loop {
        let read = pipe.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        sink.extend_from_slice(&chunk[..read]);
    }
}

/// Drives the engine through a bounded number of passes over one workspace.
#[derive(Clone)]
pub struct EngineInvoker {
    engine: Arc<dyn TypesetEngine>,
    pass_timeout: Duration,
}

impl EngineInvoker {
    pub fn new(engine: Arc<dyn TypesetEngine>, pass_timeout: Duration) -> Self {
        Self {
            engine,
            pass_timeout,
        }
    }

    /// Write `source` to `{workspace}/{source_filename}` and typeset it up to `max_passes` times.
    ///
    /// Stops early on a fatal diagnostic or a timed-out pass; otherwise the last
    /// pass's classification becomes the run's verdict.
    pub async fn compile(
        &self,
        workspace: &Workspace,
        source_filename: &str,
        source: &str,
        max_passes: NonZeroU32,
    ) -> Result<EngineRun, InfraError> {
        let source_path = workspace.join(source_filename);
        tokio::fs::write(&source_path, source).await?;

        let mut run = EngineRun::default();
        for index in 1..=max_passes.get() {
            let started_at = Instant::now();
            // Backstop for engines that overrun their own deadline.
            let attempt = tokio::time::timeout(
                self.pass_timeout + DEADLINE_GRACE,
                self.engine.run(workspace.path(), &source_path, self.pass_timeout),
            )
            .await;
            let output = match attempt {
                Ok(result) => result?,
                Err(_) => EngineOutput {
                    timed_out: true,
                    ..EngineOutput::default()
                },
            };

            if output.timed_out {
                let elapsed = started_at.elapsed();
                warn!(
                    target = "application::compile::engine",
                    op = "engine::pass",
                    result = "timeout",
                    pass = index,
                    elapsed_ms = elapsed.as_millis() as u64,
                    timeout_ms = self.pass_timeout.as_millis() as u64,
                    "Engine pass exceeded its time limit; process terminated"
                );
                run.passes.push(EnginePass {
                    index,
                    exit_code: None,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration: elapsed,
                    timed_out: true,
                });
                run.diagnostic = Some(Diagnostic::timeout(format!(
                    "engine pass {index} exceeded the {} ms time limit",
                    self.pass_timeout.as_millis()
                )));
                return Ok(run);
            }

            let pass = EnginePass {
                index,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                duration: started_at.elapsed(),
                timed_out: false,
            };
            let diagnostic = classify(&pass.stdout, &pass.stderr, pass.exit_code);

            debug!(
                target = "application::compile::engine",
                op = "engine::pass",
                pass = index,
                exit_code = pass.exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = pass.duration.as_millis() as u64,
                stdout_bytes = pass.stdout.len(),
                stderr_bytes = pass.stderr.len(),
                diagnostic = diagnostic.as_ref().map(|d| d.kind.as_str()).unwrap_or("none"),
                "Engine pass finished"
            );
            run.passes.push(pass);

            match diagnostic {
                Some(diagnostic) if diagnostic.kind.is_fatal() => {
                    run.diagnostic = Some(diagnostic);
                    return Ok(run);
                }
                other => run.diagnostic = other,
            }
        }

        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::compile::workspace::with_workspace;
    use crate::domain::diagnostic::DiagnosticKind;
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tempfile::TempDir;

    /// Replays canned outputs and counts invocations.
    struct ScriptedEngine {
        outputs: Mutex<VecDeque<EngineOutput>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedEngine {
        fn new(outputs: Vec<EngineOutput>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new(vec![EngineOutput::default()])
            }
        }
    }

    #[async_trait]
    impl TypesetEngine for ScriptedEngine {
        async fn run(
            &self,
            _workdir: &Path,
            source: &Path,
            _deadline: Duration,
        ) -> Result<EngineOutput, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(source.exists(), "source should be written before the pass");
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.outputs.lock().expect("outputs lock").pop_front();
            Ok(next.unwrap_or_else(|| ok_output("")))
        }
    }

    fn ok_output(stdout: &str) -> EngineOutput {
        EngineOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            ..EngineOutput::default()
        }
    }

    fn failed_output(stdout: &str) -> EngineOutput {
        EngineOutput {
            exit_code: Some(1),
            stdout: stdout.to_string(),
            ..EngineOutput::default()
        }
    }

    fn passes(count: u32) -> NonZeroU32 {
        NonZeroU32::new(count).expect("non-zero")
    }

    async fn run_with(
        engine: Arc<ScriptedEngine>,
        timeout: Duration,
        max_passes: u32,
    ) -> EngineRun {
        let root = TempDir::new().expect("root");
        let invoker = EngineInvoker::new(engine, timeout);
        with_workspace(root.path(), |workspace| async move {
            invoker
                .compile(&workspace, "input.tex", "\\documentclass{article}", passes(max_passes))
                .await
        })
        .await
        .expect("engine run")
    }

    #[tokio::test]
    async fn runs_all_passes_when_clean() {
        let engine = Arc::new(ScriptedEngine::new(vec![ok_output(""), ok_output("")]));
        let run = run_with(engine.clone(), Duration::from_secs(5), 2).await;

        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.passes.len(), 2);
        assert_eq!(run.passes[1].index, 2);
        assert!(run.diagnostic.is_none());
    }

    #[tokio::test]
    async fn fatal_diagnostic_stops_after_first_pass() {
        let engine = Arc::new(ScriptedEngine::new(vec![failed_output(
            "! Missing $ inserted.\nl.4 x_1\n",
        )]));
        let run = run_with(engine.clone(), Duration::from_secs(5), 2).await;

        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.passes.len(), 1);
        let diagnostic = run.diagnostic.expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::MissingDelimiter);
        assert_eq!(diagnostic.line, Some(4));
    }

    #[tokio::test]
    async fn non_fatal_failure_continues_to_next_pass() {
        let engine = Arc::new(ScriptedEngine::new(vec![
            failed_output("! Some transient problem.\n"),
            ok_output("Output written on input.pdf"),
        ]));
        let run = run_with(engine.clone(), Duration::from_secs(5), 2).await;

        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert!(run.diagnostic.is_none(), "final clean pass decides the run");
    }

    #[tokio::test]
    async fn crash_on_final_pass_is_reported() {
        let engine = Arc::new(ScriptedEngine::new(vec![
            ok_output(""),
            failed_output("! Emergency stop.\n"),
        ]));
        let run = run_with(engine, Duration::from_secs(5), 2).await;

        let diagnostic = run.diagnostic.expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::EngineCrash);
        assert_eq!(diagnostic.message, "Emergency stop.");
    }

    #[tokio::test]
    async fn timed_out_pass_keeps_partial_output() {
        let engine = Arc::new(ScriptedEngine::new(vec![EngineOutput {
            stdout: "This is pdfTeX partial log".to_string(),
            stderr: "stderr noise".to_string(),
            timed_out: true,
            ..EngineOutput::default()
        }]));
        let run = run_with(engine.clone(), Duration::from_secs(5), 2).await;

        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        let pass = run.last_pass().expect("pass recorded");
        assert!(pass.timed_out);
        assert_eq!(pass.stdout, "This is pdfTeX partial log");
        assert_eq!(pass.stderr, "stderr noise");
        assert_eq!(
            run.diagnostic.map(|d| d.kind),
            Some(DiagnosticKind::Timeout)
        );
    }

    #[tokio::test]
    async fn engine_overrunning_its_deadline_is_abandoned() {
        let engine = Arc::new(ScriptedEngine::slow(Duration::from_secs(5)));
        let run = run_with(engine.clone(), Duration::from_millis(20), 2).await;

        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.passes.len(), 1);
        assert!(run.passes[0].timed_out);
        assert_eq!(run.passes[0].exit_code, None);
        assert_eq!(
            run.diagnostic.map(|d| d.kind),
            Some(DiagnosticKind::Timeout)
        );
    }

    #[tokio::test]
    async fn missing_binary_is_reported_as_unavailable() {
        let root = TempDir::new().expect("root");
        let engine = ProcessEngine::new(root.path().join("no-such-engine"));
        let source = root.path().join("input.tex");
        std::fs::write(&source, "x").expect("write source");

        let err = engine
            .run(root.path(), &source, Duration::from_secs(5))
            .await
            .expect_err("spawn should fail");
        assert!(matches!(err, InfraError::EngineUnavailable { .. }));
    }
}
