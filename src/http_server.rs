//! HTTP listeners: metrics and health on one address, admission webhooks on another.
use crate::metrics::Metrics;
use crate::webhook;
use actix_web::dev::Server;
use actix_web::http::header::ContentType;
use actix_web::web::{self, Data};
use actix_web::{App, HttpResponse, HttpServer};
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const WORKERS: usize = 1;

#[derive(Error, Debug)]
pub enum HttpServerError {
    #[error("http server: {0}")]
    Io(#[from] std::io::Error),

    #[error("loading the webhook certificate: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub metrics_address: String,
    pub webhook_address: String,
    /// Plain HTTP for the webhooks when absent.
    pub tls: Option<TlsConfig>,
}

async fn metrics_handler(metrics: Data<Metrics>) -> HttpResponse {
    match metrics.encode() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(err) => {
            error!(error_msg = %err, "encoding metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn healthz_handler() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body("ok")
}

fn metrics_server(address: &str, metrics: Metrics) -> Result<Server, HttpServerError> {
    let metrics = Data::new(metrics);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(metrics.clone())
            .route("/metrics", web::get().to(metrics_handler))
            .route("/healthz", web::get().to(healthz_handler))
    })
    .bind(address)?
    .workers(WORKERS)
    .disable_signals()
    .run();
    Ok(server)
}

fn webhook_server(address: &str, tls: Option<&TlsConfig>) -> Result<Server, HttpServerError> {
    let server = HttpServer::new(|| {
        App::new()
            .route("/validate-runner", web::post().to(webhook::runner_handler))
            .route(
                "/validate-runnerreplicaset",
                web::post().to(webhook::replica_set_handler),
            )
    });
    let server = match tls {
        Some(tls) => {
            let mut acceptor = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;
            acceptor.set_private_key_file(&tls.key, SslFiletype::PEM)?;
            acceptor.set_certificate_chain_file(&tls.cert)?;
            server.bind_openssl(address, acceptor)?
        }
        None => server.bind(address)?,
    };
    Ok(server.workers(WORKERS).disable_signals().run())
}

/// Serves until `shutdown` is cancelled, then stops both listeners gracefully.
pub async fn run(
    config: ServerConfig,
    metrics: Metrics,
    shutdown: CancellationToken,
) -> Result<(), HttpServerError> {
    info!(address = %config.metrics_address, "starting metrics server");
    let metrics = metrics_server(&config.metrics_address, metrics)?;
    info!(
        address = %config.webhook_address,
        tls = config.tls.is_some(),
        "starting webhook server"
    );
    let webhooks = webhook_server(&config.webhook_address, config.tls.as_ref())?;

    let (metrics_handle, webhooks_handle) = (metrics.handle(), webhooks.handle());
    let stop = async move {
        shutdown.cancelled().await;
        debug!("stopping http servers");
        metrics_handle.stop(true).await;
        webhooks_handle.stop(true).await;
        Ok::<(), std::io::Error>(())
    };
    tokio::try_join!(metrics, webhooks, stop)?;
    info!("http servers stopped");
    Ok(())
}
