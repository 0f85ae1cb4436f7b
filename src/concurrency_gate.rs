//! Per-tool counting semaphore bounding simultaneous executions (spec §4.2).

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Semaphores are keyed by `(tool_name, epoch)` so that rebinding a tool to
/// a new scheduling context (e.g. a registry reload) yields a fresh gate
/// rather than reusing a permit count sized for the old configuration.
#[derive(Default)]
pub struct ConcurrencyGate {
    gates: DashMap<(String, u64), Arc<Semaphore>>,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate_for(&self, tool: &str, epoch: u64, capacity: usize) -> Arc<Semaphore> {
        self.gates
            .entry((tool.to_string(), epoch))
            .or_insert_with(|| Arc::new(Semaphore::new(capacity)))
            .clone()
    }

    /// Acquires a permit for `tool`, blocking cooperatively until one is free.
    /// The returned permit releases the slot on every exit path (drop,
    /// including panics) — callers never need to release manually.
    pub async fn acquire(
        &self,
        tool: &str,
        epoch: u64,
        capacity: usize,
    ) -> OwnedSemaphorePermit {
        let sem = self.gate_for(tool, epoch, capacity);
        sem.acquire_owned()
            .await
            .expect("concurrency semaphore is never closed")
    }

    /// Drops the gate for a tool, forcing the next `acquire` to build a fresh
    /// semaphore at the (possibly changed) capacity. Used when a tool
    /// definition is reloaded with a different `concurrency` value.
    pub fn invalidate(&self, tool: &str, epoch: u64) {
        self.gates.remove(&(tool.to_string(), epoch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn bounds_in_flight_count() {
        let gate = Arc::new(ConcurrencyGate::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire("nmap", 0, 2).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn permit_released_on_drop() {
        let gate = ConcurrencyGate::new();
        {
            let _permit = gate.acquire("amass", 0, 1).await;
        }
        // Should not block: the permit above was released on scope exit.
        let _second = gate.acquire("amass", 0, 1).await;
    }
}
