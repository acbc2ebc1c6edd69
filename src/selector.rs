//! Short-lived soft locks on UTXOs handed out by coin selection.
//!
//! A selected UTXO stays locked for a few seconds so two overlapping
//! selections can't hand the same output to different wallets. Callers hold
//! the global write lock, so a plain mutex suffices here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Default)]
pub struct CoinSelector {
    locked: Mutex<HashMap<String, SystemTime>>,
}

impl CoinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prune_expired(&self) {
        let now = SystemTime::now();

        self.locked.lock().unwrap().retain(|_, expiry| now <= *expiry);
    }

    pub fn is_locked(&self, key: &str) -> bool {
        match self.locked.lock().unwrap().get(key) {
            Some(expiry) => SystemTime::now() < *expiry,
            None => false,
        }
    }

    /// Locks `key` until `ttl` from now, overwriting any previous lock.
    pub fn lock(&self, key: &str, ttl: Duration) {
        self.locked
            .lock()
            .unwrap()
            .insert(key.to_string(), SystemTime::now() + ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_until_expiry() {
        let selector = CoinSelector::new();

        selector.lock("aa0", Duration::from_secs(10));

        assert!(selector.is_locked("aa0"));
        assert!(!selector.is_locked("aa1"));
    }

    #[test]
    fn expired_locks_are_released() {
        let selector = CoinSelector::new();

        selector.lock("aa0", Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));

        assert!(!selector.is_locked("aa0"));

        selector.prune_expired();
        assert!(selector.locked.lock().unwrap().is_empty());
    }

    #[test]
    fn relock_overwrites() {
        let selector = CoinSelector::new();

        selector.lock("aa0", Duration::from_secs(0));
        selector.lock("aa0", Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(5));
        assert!(selector.is_locked("aa0"));
    }
}
