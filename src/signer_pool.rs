//! Signer Pool (C7): a per-chain rotating pool of privileged signers with exclusive leases and
//! failure quarantine.
//!
//! Grounded in the teacher's `PendingNonceManager` (per-address `Arc<Mutex<_>>` entries in a
//! shared `DashMap`, cloned out briefly to avoid holding the map lock across an await): the same
//! shape extends naturally to "per-key exclusive lease" once the guarded value is the key's
//! availability rather than its nonce. Nonce management for a leased key is delegated to
//! Alloy's own `NonceManager` on the key's provider, since spec §4.7 only asks the pool to
//! enforce *exclusivity*, not replicate nonce tracking.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use tokio::sync::{Mutex, Notify};

use crate::network::Network;

#[derive(Debug, thiserror::Error)]
pub enum SignerPoolError {
    #[error("no signer configured for network {0}")]
    NoSignerConfigured(Network),
    #[error("no signer available within the lease timeout")]
    NoSignerAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Idle,
    Leased,
    /// Quarantined until the contained instant; consecutive-failure cooldown (spec §4.7).
    Quarantined(Instant),
}

struct KeySlot {
    signer: PrivateKeySigner,
    state: KeyState,
    consecutive_failures: u32,
}

/// The outcome a caller reports when releasing a lease, used to drive quarantine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Success,
    Failure,
}

struct PoolInner {
    keys: Vec<Mutex<KeySlot>>,
    /// FIFO order in which idle keys are offered to waiters, mirroring how a single shared
    /// `Mutex` enforces strict ordering — but scaled out across N keys.
    waiters: Mutex<VecDeque<u64>>,
    notify: Notify,
}

/// A single network's signer pool: N private keys, each usable by at most one in-flight
/// settlement at a time.
pub struct SignerPool {
    network: Network,
    inner: Arc<PoolInner>,
    quarantine_duration: Duration,
    quarantine_threshold: u32,
    lease_timeout: Duration,
    next_waiter_id: std::sync::atomic::AtomicU64,
}

/// An exclusive right to use one private key from the pool for one on-chain transaction
/// (spec GLOSSARY "Signer lease"). Dropping a lease without calling [`SignerPool::release`]
/// still frees the key (via `Drop`), but records no outcome — quarantine state is unaffected.
pub struct SignerLease {
    pool: Arc<PoolInner>,
    index: usize,
    address: Address,
    signer: PrivateKeySigner,
    released: bool,
}

impl SignerLease {
    pub fn address(&self) -> Address {
        self.address
    }

    /// The leased key. Exclusive for the lifetime of this lease: no other in-flight
    /// settlement can be holding the same key (spec §4.7 "Signer exclusivity").
    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

impl Drop for SignerLease {
    fn drop(&mut self) {
        if !self.released {
            let inner = self.inner_for_drop();
            tokio::spawn(async move {
                inner.free_slot_without_outcome().await;
            });
        }
    }
}

impl SignerLease {
    fn inner_for_drop(&self) -> DropHandle {
        DropHandle {
            pool: self.pool.clone(),
            index: self.index,
        }
    }
}

struct DropHandle {
    pool: Arc<PoolInner>,
    index: usize,
}

impl DropHandle {
    async fn free_slot_without_outcome(self) {
        let mut slot = self.pool.keys[self.index].lock().await;
        slot.state = KeyState::Idle;
        drop(slot);
        self.pool.notify.notify_one();
    }
}

impl SignerPool {
    /// Build a pool from a set of already-parsed private keys for one network.
    pub fn new(
        network: Network,
        signers: Vec<PrivateKeySigner>,
        lease_timeout: Duration,
        quarantine_duration: Duration,
        quarantine_threshold: u32,
    ) -> Result<Self, SignerPoolError> {
        if signers.is_empty() {
            return Err(SignerPoolError::NoSignerConfigured(network));
        }
        let keys = signers
            .into_iter()
            .map(|signer| {
                Mutex::new(KeySlot {
                    signer,
                    state: KeyState::Idle,
                    consecutive_failures: 0,
                })
            })
            .collect();
        Ok(SignerPool {
            network,
            inner: Arc::new(PoolInner {
                keys,
                waiters: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
            quarantine_duration,
            quarantine_threshold,
            lease_timeout,
            next_waiter_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Block (respecting FIFO order among waiters) until an idle, non-quarantined key is
    /// available, or the lease timeout elapses.
    pub async fn acquire(&self) -> Result<SignerLease, SignerPoolError> {
        let my_id = self
            .next_waiter_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        {
            let mut waiters = self.inner.waiters.lock().await;
            waiters.push_back(my_id);
        }

        let deadline = Instant::now() + self.lease_timeout;
        loop {
            if Instant::now() >= deadline {
                self.drop_waiter(my_id).await;
                return Err(SignerPoolError::NoSignerAvailable);
            }

            if self.is_front_of_line(my_id).await {
                if let Some(index) = self.try_claim_idle_slot().await {
                    self.drop_waiter(my_id).await;
                    let (address, signer) = {
                        let slot = self.inner.keys[index].lock().await;
                        (slot.signer.address(), slot.signer.clone())
                    };
                    return Ok(SignerLease {
                        pool: self.inner.clone(),
                        index,
                        address,
                        signer,
                        released: false,
                    });
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let _ = tokio::time::timeout(remaining.min(Duration::from_millis(100)), async {
                self.inner.notify.notified().await
            })
            .await;
        }
    }

    async fn is_front_of_line(&self, my_id: u64) -> bool {
        let waiters = self.inner.waiters.lock().await;
        waiters.front().copied() == Some(my_id)
    }

    async fn drop_waiter(&self, my_id: u64) {
        let mut waiters = self.inner.waiters.lock().await;
        waiters.retain(|id| *id != my_id);
    }

    async fn try_claim_idle_slot(&self) -> Option<usize> {
        let now = Instant::now();
        for (index, key) in self.inner.keys.iter().enumerate() {
            let mut slot = key.lock().await;
            match slot.state {
                KeyState::Idle => {
                    slot.state = KeyState::Leased;
                    return Some(index);
                }
                KeyState::Quarantined(until) if now >= until => {
                    slot.state = KeyState::Leased;
                    slot.consecutive_failures = 0;
                    return Some(index);
                }
                _ => continue,
            }
        }
        None
    }

    /// Release a lease, recording the settlement outcome. Consecutive failures past the
    /// configured threshold quarantine the key for `quarantine_duration`.
    pub async fn release(&self, mut lease: SignerLease, outcome: LeaseOutcome) {
        lease.released = true;
        let mut slot = self.inner.keys[lease.index].lock().await;
        match outcome {
            LeaseOutcome::Success => {
                slot.consecutive_failures = 0;
                slot.state = KeyState::Idle;
            }
            LeaseOutcome::Failure => {
                slot.consecutive_failures += 1;
                if slot.consecutive_failures >= self.quarantine_threshold {
                    slot.state = KeyState::Quarantined(Instant::now() + self.quarantine_duration);
                } else {
                    slot.state = KeyState::Idle;
                }
            }
        }
        drop(slot);
        self.inner.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;

    fn test_pool(n: usize) -> SignerPool {
        let signers: Vec<PrivateKeySigner> = (0..n).map(|_| PrivateKeySigner::random()).collect();
        SignerPool::new(
            Network::BaseSepolia,
            signers,
            Duration::from_millis(500),
            Duration::from_secs(60),
            3,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn leases_are_exclusive() {
        let pool = test_pool(1);
        let lease1 = pool.acquire().await.expect("first lease");
        let second = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(second.is_err(), "second acquire should not complete while the only key is leased");
        pool.release(lease1, LeaseOutcome::Success).await;
    }

    #[tokio::test]
    async fn released_key_is_reusable() {
        let pool = test_pool(1);
        let lease1 = pool.acquire().await.expect("first lease");
        let addr1 = lease1.address();
        pool.release(lease1, LeaseOutcome::Success).await;

        let lease2 = pool.acquire().await.expect("second lease");
        assert_eq!(lease2.address(), addr1);
        pool.release(lease2, LeaseOutcome::Success).await;
    }

    #[tokio::test]
    async fn consecutive_failures_quarantine_the_key() {
        let pool = test_pool(1);
        for _ in 0..3 {
            let lease = pool.acquire().await.expect("lease");
            pool.release(lease, LeaseOutcome::Failure).await;
        }
        let result = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(result.is_err(), "key should be quarantined after threshold failures");
    }

    #[tokio::test]
    async fn empty_signer_list_is_a_configuration_error() {
        let err = SignerPool::new(
            Network::Base,
            vec![],
            Duration::from_secs(1),
            Duration::from_secs(1),
            3,
        )
        .unwrap_err();
        assert!(matches!(err, SignerPoolError::NoSignerConfigured(Network::Base)));
    }
}
