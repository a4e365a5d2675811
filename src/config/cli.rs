use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the texpress binary.
#[derive(Debug, Parser)]
#[command(name = "texpress", version, about = "LaTeX to PDF compilation service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TEXPRESS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP conversion service.
    Serve(Box<ServeArgs>),
    /// Compile a single LaTeX file to PDF and exit.
    Compile(CompileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub compile: CompileOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CompileOverrides {
    /// Override the typesetting engine executable.
    #[arg(long = "engine-path", value_name = "PATH")]
    pub engine_path: Option<PathBuf>,

    /// Override the maximum accepted source size in bytes.
    #[arg(long = "max-source-bytes", value_name = "BYTES")]
    pub max_source_bytes: Option<u64>,

    /// Override the number of engine passes (1-5).
    #[arg(long = "max-passes", value_name = "COUNT")]
    pub max_passes: Option<u32>,

    /// Override the per-pass time limit.
    #[arg(long = "pass-timeout-seconds", value_name = "SECONDS")]
    pub pass_timeout_seconds: Option<u64>,

    /// Toggle source normalization before validation.
    #[arg(
        long = "preprocess",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub preprocessing_enabled: Option<bool>,

    /// Override the number of compilations allowed to run at once.
    #[arg(long = "max-concurrency", value_name = "COUNT")]
    pub max_concurrency: Option<u32>,

    /// Override the directory under which per-request workspaces are created.
    #[arg(long = "workspace-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub workspace_root: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct CompileArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub overrides: CompileOverrides,

    /// Where to write the PDF; defaults to the input path with a `.pdf` extension.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// LaTeX source file to compile.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}
