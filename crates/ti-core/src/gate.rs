//! Concurrency primitives shared by every job of a runtime.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::{Error, Result};

/// Default number of simultaneous tool copies.
pub const DEFAULT_COPY_PERMITS: usize = 1;

/// Copy semaphore and script mutex, constructed once and cloned into every job.
///
/// Both primitives are fair: waiters are served in arrival order. Command
/// execution never passes through the gate.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    copy: Arc<Semaphore>,
    scripts: Arc<Mutex<()>>,
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_COPY_PERMITS)
    }
}

impl ConcurrencyGate {
    /// Create a gate allowing `copy_permits` concurrent tool copies (at least one).
    pub fn new(copy_permits: usize) -> Self {
        Self {
            copy: Arc::new(Semaphore::new(copy_permits.max(1))),
            scripts: Arc::new(Mutex::new(())),
        }
    }

    /// Wait for a copy permit. The permit is released on drop.
    pub async fn acquire_copy(&self) -> Result<OwnedSemaphorePermit> {
        debug!("Waiting for tool copy permit");
        Arc::clone(&self.copy)
            .acquire_owned()
            .await
            .map_err(|_| Error::configuration("Tool copy semaphore is closed"))
    }

    /// Wait for exclusive access to the script engine.
    pub async fn lock_scripts(&self) -> OwnedMutexGuard<()> {
        debug!("Waiting for script engine lock");
        Arc::clone(&self.scripts).lock_owned().await
    }

    /// Copy permits currently free.
    pub fn available_copy_permits(&self) -> usize {
        self.copy.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_permit_released_on_drop() {
        let gate = ConcurrencyGate::new(1);
        let permit = gate.acquire_copy().await.unwrap();
        assert_eq!(gate.available_copy_permits(), 0);
        drop(permit);
        assert_eq!(gate.available_copy_permits(), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.available_copy_permits(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_script_lock() {
        let gate = ConcurrencyGate::default();
        let other = gate.clone();
        let guard = gate.lock_scripts().await;
        assert!(Arc::clone(&other.scripts).try_lock_owned().is_err());
        drop(guard);
        assert!(Arc::clone(&other.scripts).try_lock_owned().is_ok());
    }
}
