use super::error::WireError;
use super::{Wire, WireDependencies};
use crate::crd::runner::{Runner, RunnerKey};
use crate::dot_files::DotFiles;
use crate::event::channel::{pub_sub, EventConsumer, EventPublisher};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type Slot = Arc<Mutex<Option<Arc<Wire>>>>;

/// Registry of the live wires, at most one per runner key.
///
/// Every wire publishes into the same channel; the consumer returned by [WireCollection::new]
/// is the event source of the Runner controller.
pub struct WireCollection {
    deps: Arc<WireDependencies>,
    events: EventPublisher<RunnerKey>,
    wires: DashMap<RunnerKey, Slot>,
}

impl WireCollection {
    pub fn new(deps: Arc<WireDependencies>) -> (Self, EventConsumer<RunnerKey>) {
        let (events, consumer) = pub_sub();
        let collection = Self {
            deps,
            events,
            wires: DashMap::new(),
        };
        (collection, consumer)
    }

    /// Returns the wire of the runner, initialising one if there is none or the previous one
    /// was closed. Concurrent callers for the same key share a single initialisation.
    pub async fn wire_for(
        &self,
        runner: &Runner,
        dot_files: Option<DotFiles>,
    ) -> Result<Arc<Wire>, WireError> {
        let key = runner.key();
        let slot = self.wires.entry(key.clone()).or_default().clone();
        let mut current = slot.lock().await;

        if let Some(wire) = current.as_ref() {
            if !wire.is_closed() {
                return Ok(wire.clone());
            }
            debug!(runner = %key, "replacing closed wire");
        }

        let wire = Arc::new(
            Wire::init(runner, dot_files, self.deps.clone(), self.events.clone()).await?,
        );
        *current = Some(wire.clone());
        Ok(wire)
    }

    /// The current wire of the key, unless it is being initialised.
    pub fn get(&self, key: &RunnerKey) -> Option<Arc<Wire>> {
        let slot = self.wires.get(key)?.clone();
        let current = slot.try_lock().ok()?;
        current.clone()
    }

    /// Removes the wire of the key and destroys it. Returns whether there was one.
    pub async fn try_destroy(&self, key: &RunnerKey) -> Result<bool, WireError> {
        let Some((_, slot)) = self.wires.remove(key) else {
            return Ok(false);
        };
        let wire = slot.lock().await.take();
        match wire {
            Some(wire) => {
                wire.destroy().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Destroys every wire in parallel. Failures are logged.
    pub async fn deinit(&self) {
        let keys: Vec<RunnerKey> = self.wires.iter().map(|entry| entry.key().clone()).collect();
        info!(wires = keys.len(), "destroying all wires");

        let results = join_all(keys.iter().map(|key| self.try_destroy(key))).await;
        for (key, result) in keys.iter().zip(results) {
            if let Err(err) = result {
                warn!(runner = %key, "destroying wire: {err}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.wires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wires.is_empty()
    }
}
