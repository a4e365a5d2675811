//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, CompileArgs, CompileOverrides, LoggingOverrides, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "texpress";
const ENV_PREFIX: &str = "TEXPRESS";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
pub(crate) const DEFAULT_ENGINE_PATH: &str = "pdflatex";
pub(crate) const DEFAULT_MAX_SOURCE_BYTES: usize = 1024 * 1024;
pub(crate) const DEFAULT_MAX_PASSES: u32 = 2;
pub(crate) const MAX_PASSES_CEILING: u32 = 5;
const DEFAULT_PASS_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub compile: CompileSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Everything the compile pipeline needs, passed in at construction.
#[derive(Debug, Clone)]
pub struct CompileSettings {
    pub engine_path: PathBuf,
    pub max_source_bytes: NonZeroUsize,
    pub max_passes: NonZeroU32,
    pub pass_timeout: Duration,
    pub preprocessing_enabled: bool,
    pub max_concurrency: NonZeroUsize,
    pub workspace_root: PathBuf,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from(DEFAULT_ENGINE_PATH),
            max_source_bytes: NonZeroUsize::new(DEFAULT_MAX_SOURCE_BYTES)
                .unwrap_or(NonZeroUsize::MIN),
            max_passes: NonZeroU32::new(DEFAULT_MAX_PASSES).unwrap_or(NonZeroU32::MIN),
            pass_timeout: Duration::from_secs(DEFAULT_PASS_TIMEOUT_SECS),
            preprocessing_enabled: false,
            max_concurrency: NonZeroUsize::new(DEFAULT_MAX_CONCURRENCY)
                .unwrap_or(NonZeroUsize::MIN),
            workspace_root: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Compile(args)) => {
            raw.apply_logging_overrides(&args.logging);
            raw.apply_compile_overrides(&args.overrides);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    compile: RawCompileSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }

        self.apply_logging_overrides(&overrides.logging);
        self.apply_compile_overrides(&overrides.compile);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_compile_overrides(&mut self, overrides: &CompileOverrides) {
        if let Some(path) = overrides.engine_path.as_ref() {
            self.compile.engine_path = Some(path.clone());
        }
        if let Some(limit) = overrides.max_source_bytes {
            self.compile.max_source_bytes = Some(limit);
        }
        if let Some(passes) = overrides.max_passes {
            self.compile.max_passes = Some(passes);
        }
        if let Some(seconds) = overrides.pass_timeout_seconds {
            self.compile.pass_timeout_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.preprocessing_enabled {
            self.compile.preprocessing_enabled = Some(enabled);
        }
        if let Some(value) = overrides.max_concurrency {
            self.compile.max_concurrency = Some(value);
        }
        if let Some(root) = overrides.workspace_root.as_ref() {
            self.compile.workspace_root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            compile,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let compile = build_compile_settings(compile)?;

        Ok(Self {
            server,
            logging,
            compile,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_compile_settings(compile: RawCompileSettings) -> Result<CompileSettings, LoadError> {
    let defaults = CompileSettings::default();

    let engine_path = match compile.engine_path {
        Some(path) if path.as_os_str().is_empty() => {
            return Err(LoadError::invalid(
                "compile.engine_path",
                "engine path must not be empty",
            ));
        }
        Some(path) => path,
        None => defaults.engine_path,
    };

    let max_source_bytes = match compile.max_source_bytes {
        Some(value) => non_zero_usize(value, "compile.max_source_bytes")?,
        None => defaults.max_source_bytes,
    };

    let max_passes = compile.max_passes.unwrap_or(DEFAULT_MAX_PASSES);
    if !(1..=MAX_PASSES_CEILING).contains(&max_passes) {
        return Err(LoadError::invalid(
            "compile.max_passes",
            format!("must be between 1 and {MAX_PASSES_CEILING}"),
        ));
    }
    let max_passes = NonZeroU32::new(max_passes)
        .ok_or_else(|| LoadError::invalid("compile.max_passes", "must be greater than zero"))?;

    let pass_timeout_secs = compile
        .pass_timeout_seconds
        .unwrap_or(DEFAULT_PASS_TIMEOUT_SECS);
    if pass_timeout_secs == 0 {
        return Err(LoadError::invalid(
            "compile.pass_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_concurrency = match compile.max_concurrency {
        Some(value) => non_zero_usize(u64::from(value), "compile.max_concurrency")?,
        None => defaults.max_concurrency,
    };

    let workspace_root = compile
        .workspace_root
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or(defaults.workspace_root);

    Ok(CompileSettings {
        engine_path,
        max_source_bytes,
        max_passes,
        pass_timeout: Duration::from_secs(pass_timeout_secs),
        preprocessing_enabled: compile.preprocessing_enabled.unwrap_or(false),
        max_concurrency,
        workspace_root,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompileSettings {
    engine_path: Option<PathBuf>,
    max_source_bytes: Option<u64>,
    max_passes: Option<u32>,
    pass_timeout_seconds: Option<u64>,
    preprocessing_enabled: Option<bool>,
    max_concurrency: Option<u32>,
    workspace_root: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
