//! Sets up the global [tracing_subscriber].
use thiserror::Error;
use tracing::debug;
use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

/// Targets switched to `trace` when verbose tracing is on.
const CRATE_TARGETS: [&str; 2] = ["kube_actions", "actions_auth"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Error, Debug)]
pub enum TracingError {
    #[error("could not start tracing: {0}")]
    Init(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracingConfig {
    /// Logs the crate targets at `trace`.
    pub verbose: bool,
}

/// Filter directives used when `RUST_LOG` is not set.
fn directives(config: &TracingConfig) -> String {
    let mut directives = vec![LevelFilter::INFO.to_string()];
    if config.verbose {
        directives.extend(CRATE_TARGETS.iter().map(|target| format!("{target}=trace")));
    }
    directives.join(",")
}

fn env_filter(config: &TracingConfig, rust_log: Option<String>) -> EnvFilter {
    let directives = rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| directives(config));
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives)
}

pub fn try_init_tracing(config: &TracingConfig) -> Result<(), TracingError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config, std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_timer(ChronoUtc::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(true)
        .try_init()
        .map_err(|err| TracingError::Init(err.to_string()))?;
    debug!(verbose = config.verbose, "tracer initialized");
    Ok(())
}
