//! In-flight operation coalescing.
//!
//! The first caller for a key spawns the work; later callers for the same
//! key wait on its result. The work runs on the runtime, so dropping any
//! caller, the first one included, never cancels it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::ClientError;

type Outcome<V> = Option<Result<V, ClientError>>;

/// Shares one in-flight operation per key between concurrent callers.
pub struct Coalescer<K, V>
where
    K: Eq + Hash,
{
    in_flight: Arc<DashMap<K, watch::Receiver<Outcome<V>>>>,
}

impl<K, V> Default for Coalescer<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or join the run already in flight.
    ///
    /// `work` is only called when no run is in flight.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ClientError>> + Send + 'static,
    {
        let mut outcome = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());

                let fut = work();
                let guard = InFlight {
                    map: Arc::clone(&self.in_flight),
                    key,
                };
                tokio::spawn(async move {
                    let result = fut.await;
                    // Later callers start a fresh run.
                    drop(guard);
                    let _ = tx.send(Some(result));
                });
                rx
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(Err(ClientError::Abandoned)),
            Err(_) => Err(ClientError::Abandoned),
        };
        result
    }

    /// Check if a run is in flight for `key`.
    pub fn is_running(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }
}

// Removes the key when the run ends, also when it panics.
struct InFlight<K, V>
where
    K: Eq + Hash,
{
    map: Arc<DashMap<K, watch::Receiver<Outcome<V>>>>,
    key: K,
}

impl<K, V> Drop for InFlight<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}
