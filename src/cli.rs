//! Command line interface of the controller.
use crate::controller::context::DEFAULT_REQUEUE_AFTER;
use crate::http_server::{ServerConfig, TlsConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 8;

fn parse_duration(value: &str) -> Result<Duration, String> {
    duration_str::parse(value).map_err(|err| err.to_string())
}

/// Command line arguments, as parsed by [`clap`].
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)] // Read from `Cargo.toml`
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    /// Address serving `/metrics` and `/healthz`.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: String,

    /// Address serving the admission webhooks.
    #[arg(long, default_value = "0.0.0.0:9443")]
    pub webhook_bind_address: String,

    /// PEM certificate chain for the admission webhooks.
    #[arg(long, requires = "webhook_key")]
    pub webhook_cert: Option<PathBuf>,

    /// PEM private key for the admission webhooks.
    #[arg(long, requires = "webhook_cert")]
    pub webhook_key: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILES)]
    pub max_concurrent_reconciles: u16,

    /// Backoff before retrying a failed reconcile, e.g. `15s` or `1m`.
    #[arg(long, value_parser = parse_duration, default_value = "15s")]
    pub requeue_after: Duration,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum CliCommand {
    /// Prints the custom resource definitions as YAML and exits.
    Crds,
}

impl Cli {
    pub fn init() -> Self {
        Self::parse()
    }

    pub fn server_config(&self) -> ServerConfig {
        let tls = match (&self.webhook_cert, &self.webhook_key) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        };
        ServerConfig {
            metrics_address: self.metrics_bind_address.clone(),
            webhook_address: self.webhook_bind_address.clone(),
            tls,
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            command: None,
            metrics_bind_address: "0.0.0.0:8080".to_string(),
            webhook_bind_address: "0.0.0.0:9443".to_string(),
            webhook_cert: None,
            webhook_key: None,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            requeue_after: DEFAULT_REQUEUE_AFTER,
        }
    }
}

/// Every custom resource definition as a multi document YAML stream.
pub fn crds_yaml() -> Result<String, serde_yaml::Error> {
    crate::crd::definitions()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map(|documents| documents.join("---\n"))
}
