use std::time::Duration;

use log::LevelFilter;
use sieve_rs::{
    networking::messages::Message,
    ordering::messages::OrderingMessage,
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

/// The primary of epoch 0 stops responding after the first request is committed. The remaining 3
/// replicas are a quorum, and keep committing in epoch 1.
#[test]
fn primary_crash_test() {
    setup_logger(LevelFilter::Debug);

    let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());

    // 1. Commit a request while every replica is up.
    network.submit(0, Batch::single(b"tx1".to_vec()));
    let committed = network.run_until(
        |network| network.blockchain_sizes().iter().all(|size| *size == 2) && network.is_idle(),
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());

    // 2. Cut replica 0 off, and submit another request.
    log::debug!("Disconnecting replica 0.");
    let crashed = ReplicaID::new(0);
    network.set_filter(Box::new(move |route: &Route, bytes: Vec<u8>| {
        if route.src == crashed || route.dst == crashed {
            None
        } else {
            Some(bytes)
        }
    }));
    network.submit(2, Batch::single(b"tx2".to_vec()));

    // 3. The other replicas time out, move to epoch 1, and commit the request there.
    let committed = network.run_until(
        |network| {
            network.blockchain_sizes()[1..].iter().all(|size| *size == 3)
                && network.replicas()[1..]
                    .iter()
                    .all(|replica| replica.epoch() == Epoch::new(1) && replica.is_idle())
        },
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());
    assert_eq!(network.blockchain_sizes(), vec![2, 3, 3, 3]);
    assert_eq!(network.replica(0).epoch(), Epoch::init());

    let reference = network.replica(1).stack().blocks().to_vec();
    assert_eq!(reference[2].batch, Batch::single(b"tx2".to_vec()));
    assert_eq!(network.replica(0).stack().blocks(), &reference[..2]);
    for replica in &network.replicas()[1..] {
        assert_eq!(replica.stack().blocks(), reference.as_slice());
    }
}

/// Every replica prepares a request in epoch 0, but no commit gets through, so none of them delivers
/// it. The entry is carried into epoch 1, where the request is committed exactly once.
#[test]
fn prepared_carryover_test() {
    setup_logger(LevelFilter::Debug);

    let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());
    network.set_filter(Box::new(|_: &Route, bytes: Vec<u8>| {
        let blocked = Message::decode(&bytes).is_ok_and(|msg| {
            msg.epoch() == Some(Epoch::init())
                && matches!(msg, Message::Ordering(OrderingMessage::Commit(_)))
        });
        if blocked {
            None
        } else {
            Some(bytes)
        }
    }));

    let tx1 = Batch::single(b"tx1".to_vec());
    network.submit(0, tx1.clone());

    let committed = network.run_until(
        |network| {
            network.blockchain_sizes().iter().all(|size| *size == 2)
                && network.is_idle()
                && network.replicas().iter().all(|replica| replica.epoch() == Epoch::new(1))
        },
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());

    let tx1_id = tx1.transactions[0].id();
    for replica in network.replicas() {
        assert_eq!(replica.stack().blocks()[1].batch, tx1);
        let executed_tx_ids = replica.stack().executed_tx_ids();
        assert_eq!(*executed_tx_ids.lock().unwrap(), vec![tx1_id.clone()]);
    }
}
