use std::time::Duration;

use log::LevelFilter;
use rand::{rngs::StdRng, SeedableRng};
use sieve_rs::types::block::Batch;

mod common;

use crate::common::{logging::setup_logger, mem_stack::MemStack, sim_network::SimNetwork};

/// Deliver every message in a random (but reproducible) order. Replicas must still commit the same
/// blocks in the same order.
#[test]
fn reordering_test() {
    setup_logger(LevelFilter::Info);

    for seed in 1..=5u64 {
        log::info!("Running with seed {}.", seed);
        let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());
        network.reorder_with(StdRng::seed_from_u64(seed));

        for (i, payload) in [b"tx1", b"tx2", b"tx3"].iter().enumerate() {
            network.submit(i, Batch::single(payload.to_vec()));
        }
        let committed = network.run_until(
            |network| network.blockchain_sizes().iter().all(|size| *size == 4) && network.is_idle(),
            Duration::from_secs(10),
        );
        assert!(committed, "seed {}: blockchain sizes: {:?}", seed, network.blockchain_sizes());

        let reference = network.replica(0).stack().blocks().to_vec();
        for replica in network.replicas() {
            assert_eq!(replica.stack().blocks(), reference.as_slice(), "seed {}", seed);
        }

        let mut batches: Vec<Batch> = reference[1..].iter().map(|block| block.batch.clone()).collect();
        batches.sort_by_key(|batch| batch.transactions[0].payload.clone());
        assert_eq!(
            batches,
            vec![
                Batch::single(b"tx1".to_vec()),
                Batch::single(b"tx2".to_vec()),
                Batch::single(b"tx3".to_vec())
            ]
        );
    }
}
