use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Replaces the computed filter entirely when set.
pub const FILTER_VAR: &str = "GHOSTBIRD_LOG_FILTER";
/// Lets dependencies log at trace level along with ours.
const TRACE_DEPS_VAR: &str = "GHOSTBIRD_TRACE_DEPS";

const OWN_TARGETS: &[&str] = &["ghostbird", "transport_port"];
const NOISY_DEPENDENCIES: &[&str] = &[
    "hyper",
    "hyper_util",
    "tungstenite",
    "tokio_tungstenite",
    "reqwest",
    "rustls",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install logger: {0}")]
    Install(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Calls after the first successful one do
/// nothing.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let directives = match std::env::var(FILTER_VAR) {
        Ok(custom) => custom,
        Err(_) => directives_for(config.level, trace_deps_requested()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&directives))
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .try_init()
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = GUARD.set(guard);
    tracing::debug!(%directives, "logging initialized");
    Ok(())
}

fn trace_deps_requested() -> bool {
    std::env::var(TRACE_DEPS_VAR).is_ok_and(|value| !value.is_empty() && value != "0")
}

/// Builds the filter directives for `level`. Verbose levels apply to our own
/// crates only; everything else stays at info, and at trace the noisy
/// dependencies are held at info unless `trace_deps` is set.
fn directives_for(level: LogLevel, trace_deps: bool) -> String {
    if level <= LogLevel::Info {
        return level.directive().to_owned();
    }

    let own = level.directive();
    let mut directives = vec!["info".to_owned()];
    directives.extend(OWN_TARGETS.iter().map(|target| format!("{target}={own}")));
    if level == LogLevel::Trace {
        if trace_deps {
            directives[0] = "trace".to_owned();
        } else {
            directives.extend(NOISY_DEPENDENCIES.iter().map(|target| format!("{target}=info")));
        }
    }
    directives.join(",")
}
