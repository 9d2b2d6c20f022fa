use std::time::Duration;

use log::LevelFilter;
use sieve_rs::{
    networking::messages::Message,
    types::{
        block::Batch,
        data_types::{Epoch, ReplicaID},
    },
};

mod common;

use crate::common::{
    logging::setup_logger,
    mem_stack::MemStack,
    sim_network::{Route, SimNetwork},
};

/// The primary of epoch 0 never gets any of its ordering messages through, so nothing it proposes is
/// ever ordered. The other replicas must time out, move to epoch 1, and commit the request there.
#[test]
fn no_decision_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start 4 replicas, and drop every ordering message that replica 0 sends.
    let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());
    network.set_filter(Box::new(|route: &Route, bytes: Vec<u8>| {
        if route.src == ReplicaID::new(0) && Message::decode(&bytes).is_ok_and(|msg| msg.is_ordering()) {
            None
        } else {
            Some(bytes)
        }
    }));

    // 2. Submit a request to replica 1, the primary of epoch 1.
    log::debug!("Submitting a request to replica 1.");
    let tx1 = Batch::single(b"tx1".to_vec());
    network.submit(1, tx1.clone());

    // 3. Wait until every replica has moved to epoch 1 and committed the request.
    let committed = network.run_until(
        |network| {
            network.blockchain_sizes().iter().all(|size| *size == 2)
                && network.replicas().iter().all(|replica| replica.epoch() == Epoch::new(1))
        },
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());
    for replica in network.replicas() {
        assert_eq!(replica.primary(), ReplicaID::new(1));
        assert_eq!(replica.stack().blocks()[1].batch, tx1);
    }

    // 4. Resubmitting the committed request to another replica changes nothing, even after every
    //    timer would have expired.
    log::debug!("Resubmitting the committed request to replica 3.");
    network.submit(3, tx1);
    network.run_for(Duration::from_secs(1));

    assert_eq!(network.blockchain_sizes(), vec![2, 2, 2, 2]);
    assert!(network.replicas().iter().all(|replica| replica.epoch() == Epoch::new(1)));
    assert!(network.is_idle());
}
