//! Prometheus metrics served on `/metrics`.
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use reqwest::header::HeaderMap;
use thiserror::Error;
use tracing::trace;

pub const NAMESPACE: &str = "kube_actions";

const RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";
const RATE_REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RATE_RESOURCE_HEADER: &str = "x-ratelimit-resource";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    rate_limit: IntGaugeVec,
    rate_remaining: IntGaugeVec,
    api_calls: IntCounterVec,
    cache_hits: IntCounterVec,
    cache_misses: IntCounterVec,
    job_alive: IntGaugeVec,
    jobs_done: IntCounterVec,
}

impl Metrics {
    pub fn try_new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).namespace(NAMESPACE);

        let metrics = Metrics {
            rate_limit: IntGaugeVec::new(
                opts("github_rate_limit", "GitHub API rate limit per window"),
                &["client", "resource"],
            )?,
            rate_remaining: IntGaugeVec::new(
                opts("github_rate_limit_remaining", "GitHub API calls left in the window"),
                &["client", "resource"],
            )?,
            api_calls: IntCounterVec::new(
                opts("github_api_calls_total", "GitHub API calls issued"),
                &["client"],
            )?,
            cache_hits: IntCounterVec::new(
                opts("cache_hits_total", "Token cache hits"),
                &["kind"],
            )?,
            cache_misses: IntCounterVec::new(
                opts("cache_misses_total", "Token cache misses"),
                &["kind"],
            )?,
            job_alive: IntGaugeVec::new(
                opts("job_alive", "Jobs currently materialised per runner"),
                &["namespace", "runner"],
            )?,
            jobs_done: IntCounterVec::new(
                opts("jobs_done_total", "Jobs finished per runner"),
                &["namespace", "runner"],
            )?,
            registry,
        };

        metrics.registry.register(Box::new(metrics.rate_limit.clone()))?;
        metrics.registry.register(Box::new(metrics.rate_remaining.clone()))?;
        metrics.registry.register(Box::new(metrics.api_calls.clone()))?;
        metrics.registry.register(Box::new(metrics.cache_hits.clone()))?;
        metrics.registry.register(Box::new(metrics.cache_misses.clone()))?;
        metrics.registry.register(Box::new(metrics.job_alive.clone()))?;
        metrics.registry.register(Box::new(metrics.jobs_done.clone()))?;
        Ok(metrics)
    }

    /// Counts a call and records the rate limit headers the API answered with.
    pub fn observe_response(&self, client: &str, headers: &HeaderMap) {
        self.api_calls.with_label_values(&[client]).inc();

        let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
        let resource = header(RATE_RESOURCE_HEADER).unwrap_or("core");
        if let Some(limit) = header(RATE_LIMIT_HEADER).and_then(|v| v.parse::<i64>().ok()) {
            self.rate_limit
                .with_label_values(&[client, resource])
                .set(limit);
        }
        if let Some(remaining) = header(RATE_REMAINING_HEADER).and_then(|v| v.parse::<i64>().ok())
        {
            trace!(%client, %resource, remaining, "github rate limit");
            self.rate_remaining
                .with_label_values(&[client, resource])
                .set(remaining);
        }
    }

    pub fn cache_hit(&self, kind: &str) {
        self.cache_hits.with_label_values(&[kind]).inc();
    }

    pub fn cache_miss(&self, kind: &str) {
        self.cache_misses.with_label_values(&[kind]).inc();
    }

    pub fn job_started(&self, namespace: &str, runner: &str) {
        self.job_alive.with_label_values(&[namespace, runner]).set(1);
    }

    pub fn job_done(&self, namespace: &str, runner: &str) {
        self.job_alive.with_label_values(&[namespace, runner]).set(0);
        self.jobs_done.with_label_values(&[namespace, runner]).inc();
    }

    /// Text exposition of every registered family.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|err| MetricsError::Encoding(err.to_string()))?;
        String::from_utf8(buffer).map_err(|err| MetricsError::Encoding(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_observe_response() {
        let metrics = Metrics::try_new().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(RATE_LIMIT_HEADER, HeaderValue::from_static("5000"));
        headers.insert(RATE_REMAINING_HEADER, HeaderValue::from_static("4990"));

        metrics.observe_response("app", &headers);
        metrics.observe_response("app", &HeaderMap::new());

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"kube_actions_github_api_calls_total{client="app"} 2"#));
        assert!(text.contains(r#"kube_actions_github_rate_limit{client="app",resource="core"} 5000"#));
        assert!(text.contains(
            r#"kube_actions_github_rate_limit_remaining{client="app",resource="core"} 4990"#
        ));
    }

    #[test]
    fn test_job_lifecycle() {
        let metrics = Metrics::try_new().unwrap();
        metrics.job_started("a", "r");
        assert!(metrics
            .encode()
            .unwrap()
            .contains(r#"kube_actions_job_alive{namespace="a",runner="r"} 1"#));

        metrics.job_done("a", "r");
        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"kube_actions_job_alive{namespace="a",runner="r"} 0"#));
        assert!(text.contains(r#"kube_actions_jobs_done_total{namespace="a",runner="r"} 1"#));
    }

    #[test]
    fn test_cache_counters() {
        let metrics = Metrics::try_new().unwrap();
        metrics.cache_hit("registration-token");
        metrics.cache_miss("registration-token");
        metrics.cache_hit("registration-token");

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"kube_actions_cache_hits_total{kind="registration-token"} 2"#));
        assert!(text.contains(r#"kube_actions_cache_misses_total{kind="registration-token"} 1"#));
    }
}
