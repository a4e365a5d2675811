use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use texpress::{
    application::{compile::CompileService, error::AppError},
    config::{self, CompileArgs},
    infra::{
        error::InfraError,
        http::{self, AppState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Compile(args) => run_compile(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let compiler = Arc::new(CompileService::with_process_engine(
        settings.compile.clone(),
    ));
    let router = http::build_router(AppState::new(compiler));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "texpress::serve",
        addr = %settings.server.addr,
        engine = %settings.compile.engine_path.display(),
        max_passes = settings.compile.max_passes.get(),
        max_concurrency = settings.compile.max_concurrency.get(),
        preprocessing = settings.compile.preprocessing_enabled,
        "Listening for conversion requests"
    );

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
            info!(target = "texpress::serve", "Server stopped");
        }
        () = drain_deadline(settings.server.graceful_shutdown) => {
            warn!(
                target = "texpress::serve",
                grace_seconds = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown window elapsed; abandoning in-flight compilations"
            );
        }
    }

    Ok(())
}

async fn run_compile(settings: config::Settings, args: CompileArgs) -> Result<(), AppError> {
    let source = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(InfraError::from)?;
    let output = args
        .output
        .unwrap_or_else(|| args.file.with_extension("pdf"));

    let service = CompileService::with_process_engine(settings.compile);
    let request = service.request(source, None)?;
    let document = service.compile(request).await?;

    tokio::fs::write(&output, &document.pdf)
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "texpress::compile",
        input = %args.file.display(),
        output = %output.display(),
        passes = document.passes,
        pdf_bytes = document.pdf.len(),
        elapsed_ms = document.elapsed.as_millis() as u64,
        "PDF written"
    );
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "texpress::serve", error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "texpress::serve", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Resolves once the grace period after a shutdown request has run out.
async fn drain_deadline(grace: Duration) {
    shutdown_signal().await;
    info!(
        target = "texpress::serve",
        grace_seconds = grace.as_secs(),
        "Shutdown requested; draining connections"
    );
    tokio::time::sleep(grace).await;
}
