use crate::converters::PodConfig;
use crate::k8s::client::K8sClient;
use crate::metrics::Metrics;
use crate::wire::collection::WireCollection;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(15);

/// State shared by every reconcile call.
pub struct Context {
    pub client: K8sClient,
    pub wires: Arc<WireCollection>,
    pub pod: PodConfig,
    pub metrics: Metrics,
    /// Backoff applied after a failed reconcile.
    pub requeue_after: Duration,
}
