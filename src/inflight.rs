//! In-flight operation registry.
//!
//! Mutual-exclusion set keyed by volume ID. Every mutating RPC takes a guard
//! at entry; a second concurrent call for the same volume is rejected
//! immediately with ABORTED, never queued.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{Error, Result};

#[derive(Default)]
pub struct InFlight {
    volumes: Mutex<HashSet<String>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a volume ID. Returns true if newly inserted, false if an
    /// operation for this volume is already in flight.
    pub fn insert(&self, volume_id: &str) -> bool {
        let mut volumes = self.volumes.lock().unwrap_or_else(|e| e.into_inner());
        volumes.insert(volume_id.to_string())
    }

    /// Release a volume ID.
    pub fn delete(&self, volume_id: &str) {
        let mut volumes = self.volumes.lock().unwrap_or_else(|e| e.into_inner());
        volumes.remove(volume_id);
    }

    pub fn contains(&self, volume_id: &str) -> bool {
        let volumes = self.volumes.lock().unwrap_or_else(|e| e.into_inner());
        volumes.contains(volume_id)
    }

    /// Take the guard for a volume, failing with `OperationPending` if one is
    /// already held. The guard releases the slot when dropped, on every exit
    /// path.
    pub fn guard(&self, volume_id: &str) -> Result<OperationGuard<'_>> {
        if !self.insert(volume_id) {
            return Err(Error::OperationPending(volume_id.to_string()));
        }
        Ok(OperationGuard {
            registry: self,
            volume_id: volume_id.to_string(),
        })
    }
}

pub struct OperationGuard<'a> {
    registry: &'a InFlight,
    volume_id: String,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.registry.delete(&self.volume_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_exclusive_per_volume() {
        let inflight = InFlight::new();
        assert!(inflight.insert("vol-1"));
        assert!(!inflight.insert("vol-1"));
        assert!(inflight.insert("vol-2"));
    }

    #[test]
    fn delete_allows_reinsert() {
        let inflight = InFlight::new();
        assert!(inflight.insert("vol-1"));
        inflight.delete("vol-1");
        assert!(inflight.insert("vol-1"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let inflight = InFlight::new();
        {
            let _guard = inflight.guard("vol-1").unwrap();
            assert!(inflight.contains("vol-1"));
            assert!(matches!(
                inflight.guard("vol-1"),
                Err(Error::OperationPending(_))
            ));
        }
        assert!(!inflight.contains("vol-1"));
    }

    #[test]
    fn guard_releases_on_early_return() {
        let inflight = InFlight::new();

        fn fails_midway(inflight: &InFlight) -> Result<()> {
            let _guard = inflight.guard("vol-1")?;
            Err(Error::PathNotFound("/nope".to_string()))
        }

        assert!(fails_midway(&inflight).is_err());
        assert!(!inflight.contains("vol-1"));
    }

    #[test]
    fn concurrent_inserts_admit_exactly_one() {
        use std::sync::Arc;

        let inflight = Arc::new(InFlight::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let inflight = Arc::clone(&inflight);
            handles.push(std::thread::spawn(move || inflight.insert("vol-1")));
        }
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(admitted, 1);
    }
}
