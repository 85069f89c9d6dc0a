//! Signer exclusivity under genuine concurrency (spec.md §8 "Signer exclusivity": for every
//! signer key K and window W where at least two settlements overlap and share K, at most one is
//! in `Submitted..Confirmed` at any instant). `signer_pool.rs`'s own unit tests cover the
//! single-task acquire/release/quarantine paths; this exercises the pool the way concurrent
//! `/settle` requests actually would, with real `tokio::spawn` tasks racing for a 2-key pool.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;

use x402_settle::network::Network;
use x402_settle::signer_pool::{LeaseOutcome, SignerPool};

#[tokio::test]
async fn concurrent_settlements_never_double_lease_a_key() {
    let signers: Vec<PrivateKeySigner> = (0..2).map(|_| PrivateKeySigner::random()).collect();
    let pool = Arc::new(
        SignerPool::new(
            Network::BaseSepolia,
            signers,
            Duration::from_secs(5),
            Duration::from_secs(60),
            3,
        )
        .unwrap(),
    );

    let concurrent_holders = Arc::new(std::sync::Mutex::new(0usize));
    let max_concurrent_holders = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let pool = pool.clone();
        let concurrent_holders = concurrent_holders.clone();
        let max_concurrent_holders = max_concurrent_holders.clone();
        tasks.push(tokio::spawn(async move {
            let lease = pool.acquire().await.expect("lease within timeout");

            {
                let mut held = concurrent_holders.lock().unwrap();
                *held += 1;
                max_concurrent_holders.fetch_max(*held, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            {
                let mut held = concurrent_holders.lock().unwrap();
                *held -= 1;
            }

            pool.release(lease, LeaseOutcome::Success).await;
        }));
    }

    for task in tasks {
        task.await.expect("task panicked");
    }

    // With a 2-key pool, at most 2 settlements ever hold a lease at once, regardless of how many
    // of the 12 tasks raced for one.
    assert!(max_concurrent_holders.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn every_acquired_lease_uses_a_distinct_pool_address_when_held_concurrently() {
    let signers: Vec<PrivateKeySigner> = (0..3).map(|_| PrivateKeySigner::random()).collect();
    let expected_addresses: HashSet<Address> = signers.iter().map(|s| s.address()).collect();

    let pool = Arc::new(
        SignerPool::new(
            Network::Base,
            signers,
            Duration::from_secs(5),
            Duration::from_secs(60),
            3,
        )
        .unwrap(),
    );

    let lease_a = pool.acquire().await.unwrap();
    let lease_b = pool.acquire().await.unwrap();
    let lease_c = pool.acquire().await.unwrap();

    let held: HashSet<Address> = [lease_a.address(), lease_b.address(), lease_c.address()]
        .into_iter()
        .collect();
    assert_eq!(held.len(), 3, "three concurrent leases must use three distinct keys");
    assert!(held.is_subset(&expected_addresses));

    pool.release(lease_a, LeaseOutcome::Success).await;
    pool.release(lease_b, LeaseOutcome::Success).await;
    pool.release(lease_c, LeaseOutcome::Success).await;
}
