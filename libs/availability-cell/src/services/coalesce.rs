// libs/availability-cell/src/services/coalesce.rs
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::debug;

/// Collapses concurrent duplicate computations: while one call for a key is
/// in flight, later callers for the same key await its result instead of
/// repeating the work. Once the call completes the key is released, so the
/// next caller always computes fresh. Nothing is ever served from a result
/// that finished before the caller arrived.
pub struct SingleFlight<K, V> {
    in_flight: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let (cell, leader) = {
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => (entry.insert(Arc::new(OnceCell::new())).clone(), true),
            }
        };

        if !leader {
            debug!("Joining an in-flight computation for a duplicate request");
        }

        // If the leader is cancelled mid-compute, the next waiter's closure
        // takes over the initialization.
        let value = cell.get_or_init(compute).await.clone();

        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(current) = in_flight.get(&key) {
            if Arc::ptr_eq(current, &cell) {
                in_flight.remove(&key);
            }
        }

        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_duplicates_share_one_computation() {
        let flight = SingleFlight::new();
        let runs = AtomicUsize::new(0);

        let compute = || async {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            42
        };

        let (a, b) = tokio::join!(flight.run("slots", compute), flight.run("slots", compute));

        assert_eq!(a, 42);
        assert_eq!(b, 42);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_compute_fresh() {
        let flight = SingleFlight::new();
        let runs = AtomicUsize::new(0);

        let compute = || async {
            runs.fetch_add(1, Ordering::SeqCst);
            runs.load(Ordering::SeqCst)
        };

        assert_eq!(flight.run("slots", compute).await, 1);
        assert_eq!(flight.run("slots", compute).await, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let flight = SingleFlight::new();
        let runs = AtomicUsize::new(0);

        let compute = || async {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
        };

        tokio::join!(flight.run("monday", compute), flight.run("tuesday", compute));

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
