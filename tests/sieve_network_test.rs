use std::time::Duration;

use log::LevelFilter;
use sieve_rs::types::{block::Batch, data_types::Epoch};

mod common;

use crate::common::{logging::setup_logger, mem_stack::MemStack, sim_network::SimNetwork};

#[test]
fn sieve_network_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start 4 replicas with deterministic stacks. Replica 0 is the primary of epoch 0.
    let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());
    assert!(network.replicas().iter().all(|replica| replica.primary().int() == 0));

    // 2. Submit a request to a backup, and wait until every replica commits it.
    log::debug!("Submitting a request to replica 2.");
    network.submit(2, Batch::single(b"tx1".to_vec()));
    let committed = network.run_until(
        |network| network.blockchain_sizes().iter().all(|size| *size == 2),
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());

    // 3. Submit more requests, to different replicas, and wait until every replica commits all of them.
    log::debug!("Submitting 3 requests to 3 different replicas.");
    network.submit(0, Batch::single(b"tx2".to_vec()));
    network.submit(1, Batch::single(b"tx3".to_vec()));
    network.submit(3, Batch::single(b"tx4".to_vec()));
    let committed = network.run_until(
        |network| network.blockchain_sizes().iter().all(|size| *size == 5) && network.is_idle(),
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());

    // 4. Every replica holds the same blocks, and no epoch change happened.
    let reference = network.replica(0).stack().blocks().to_vec();
    assert!(reference.iter().all(|block| block.is_correct()));
    for replica in network.replicas() {
        assert_eq!(replica.stack().blocks(), reference.as_slice());
        assert_eq!(replica.epoch(), Epoch::init());
        assert!(replica.pending_slots().is_empty());
    }
}

#[test]
fn single_replica_commits_on_submit_test() {
    setup_logger(LevelFilter::Debug);

    // A replica set of one is its own quorum, so submitting is enough to commit.
    let mut network = SimNetwork::new(vec![MemStack::new()]);
    network.submit(0, Batch::single(b"tx1".to_vec()));
    assert_eq!(network.blockchain_sizes(), vec![2]);

    network.submit(0, Batch::single(b"tx2".to_vec()));
    network.process();
    assert_eq!(network.blockchain_sizes(), vec![3]);
    assert!(network.is_idle());
}
