//! Entry point of the controller.
//!
//! Parses the command line, then either prints the custom resource definitions or runs the
//! controllers, the wires and the HTTP listeners until SIGINT or SIGTERM.
use kube_actions::actions::connector::HttpConnector;
use kube_actions::cli::{crds_yaml, Cli, CliCommand};
use kube_actions::config::KubeActionsConfig;
use kube_actions::controller::{self, Context};
use kube_actions::github::auth::Authenticator;
use kube_actions::github::client::GitHubClient;
use kube_actions::http_server;
use kube_actions::instrumentation::tracing::{try_init_tracing, TracingConfig};
use kube_actions::k8s::client::K8sClient;
use kube_actions::metrics::Metrics;
use kube_actions::wire::collection::WireCollection;
use kube_actions::wire::WireDependencies;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

fn main() -> ExitCode {
    let cli = Cli::init();

    if let Some(CliCommand::Crds) = cli.command {
        return match crds_yaml() {
            Ok(yaml) => {
                print!("{yaml}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("could not render the custom resource definitions: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let config = match KubeActionsConfig::load() {
        Ok(config) => config,
        Err(err) => {
            // the tracer is not up yet
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = try_init_tracing(&TracingConfig {
        verbose: config.trace,
    }) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match _main(cli, config) {
        Ok(()) => {
            info!("exiting gracefully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("the controller exited with an error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Separated from [main] so errors are propagated and logged once, as a string.
fn _main(cli: Cli, config: KubeActionsConfig) -> Result<(), Box<dyn Error>> {
    let shutdown = CancellationToken::new();
    trace!("creating the signal handler");
    create_shutdown_signal_handler(shutdown.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, config, shutdown))
}

async fn run(
    cli: Cli,
    config: KubeActionsConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let metrics = Metrics::try_new()?;
    let client = K8sClient::try_default().await?;
    let http = reqwest::Client::new();

    let shared_metrics = Arc::new(metrics.clone());
    let authenticator = Authenticator::try_new(
        config.credentials,
        http.clone(),
        config.api_url.clone(),
        shared_metrics.clone(),
    )?;
    info!(
        api_url = %config.api_url,
        client = authenticator.client_label(),
        "authenticating against GitHub"
    );
    let code_host = GitHubClient::new(
        http.clone(),
        config.api_url,
        authenticator,
        config.access,
        shared_metrics,
    );
    let deps = Arc::new(WireDependencies {
        code_host: Arc::new(code_host),
        connector: Arc::new(HttpConnector::new(http)),
        settings: config.wire,
    });
    let (wires, wire_events) = WireCollection::new(deps);
    let wires = Arc::new(wires);

    let ctx = Arc::new(Context {
        client,
        wires: wires.clone(),
        pod: config.pod,
        metrics: metrics.clone(),
        requeue_after: cli.requeue_after,
    });

    let server_config = cli.server_config();
    let server_shutdown = shutdown.clone();
    let servers = async move {
        let served = http_server::run(server_config, metrics, server_shutdown.clone()).await;
        // a listener that can not start takes the controllers down with it
        server_shutdown.cancel();
        served
    };
    let controllers = controller::run(
        ctx,
        wire_events,
        cli.max_concurrent_reconciles,
        shutdown.clone(),
    );
    let (served, ()) = tokio::join!(servers, controllers);

    info!(wires = wires.len(), "destroying wires");
    wires.deinit().await;
    served?;
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
fn create_shutdown_signal_handler(shutdown: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("received a termination signal, stopping");
        shutdown.cancel();
    })
    .inspect_err(|err| error!("could not set the signal handler: {err}"))
}
