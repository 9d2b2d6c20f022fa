use std::time::Duration;

use ed25519_dalek::{SigningKey, VerifyingKey};
use log::LevelFilter;
use rand_core::OsRng;
use sieve_rs::{
    networking::messages::Message,
    ordering::messages::OrderingMessage,
    replica::{Configuration, ConfigurationError, SieveError, SieveReplica},
    types::{
        block::Batch,
        data_types::{Epoch, ReplicaID},
    },
};

mod common;

use crate::common::{
    logging::setup_logger,
    mem_stack::MemStack,
    network::mock_network,
    sim_network::SimNetwork,
};

fn configuration(me: SigningKey, replicas: Vec<VerifyingKey>) -> Configuration {
    Configuration::builder()
        .me(me)
        .replicas(replicas)
        .request_timeout(Duration::from_millis(200))
        .new_view_timeout(Duration::from_millis(400))
        .last_new_view_timeout(Duration::from_millis(400))
        .log_events(false)
        .build()
}

fn validate(configuration: Configuration) -> Option<ConfigurationError> {
    let network = mock_network(1).remove(0);
    SieveReplica::new(configuration, network, MemStack::new()).err()
}

#[test]
fn configuration_validation_test() {
    setup_logger(LevelFilter::Debug);

    let mut csprg = OsRng {};
    let keypairs: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let verifying_keys: Vec<VerifyingKey> = keypairs.iter().map(|kp| kp.verifying_key()).collect();
    let outsider = SigningKey::generate(&mut csprg);

    // A valid configuration.
    assert_eq!(validate(configuration(keypairs[0].clone(), verifying_keys.clone())), None);

    // The replica set must be non-empty, free of duplicates, and include this replica.
    assert_eq!(
        validate(configuration(keypairs[0].clone(), Vec::new())),
        Some(ConfigurationError::EmptyReplicaSet)
    );
    assert_eq!(
        validate(configuration(
            keypairs[0].clone(),
            vec![verifying_keys[0], verifying_keys[1], verifying_keys[1]]
        )),
        Some(ConfigurationError::DuplicateReplica(ReplicaID::new(2)))
    );
    assert_eq!(
        validate(configuration(outsider, verifying_keys.clone())),
        Some(ConfigurationError::NotAReplica)
    );

    // Timeouts must not be zero.
    let mut zero_timeout = configuration(keypairs[0].clone(), verifying_keys.clone());
    zero_timeout.new_view_timeout = Duration::ZERO;
    assert_eq!(
        validate(zero_timeout),
        Some(ConfigurationError::ZeroTimeout("new_view_timeout"))
    );

    // The commit quorum must be more than f = 1 and at most n = 4.
    for (commit_quorum, valid) in [(1, false), (2, true), (3, true), (4, true), (5, false)] {
        let mut config = configuration(keypairs[1].clone(), verifying_keys.clone());
        config.commit_quorum = Some(commit_quorum);
        let expected = if valid {
            None
        } else {
            Some(ConfigurationError::InvalidCommitQuorum { commit_quorum, n: 4 })
        };
        assert_eq!(validate(config), expected);
    }
}

#[test]
fn idempotent_resubmission_test() {
    setup_logger(LevelFilter::Debug);

    let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());
    let tx1 = Batch::single(b"tx1".to_vec());

    // 1. Commit a request, submitting it to two replicas at once.
    network.submit(0, tx1.clone());
    network.submit(3, tx1.clone());
    let committed = network.run_until(
        |network| network.blockchain_sizes().iter().all(|size| *size == 2) && network.is_idle(),
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());

    // 2. Resubmit it everywhere, and run for longer than any timeout.
    for i in 0..4 {
        network.submit(i, tx1.clone());
    }
    network.run_for(Duration::from_secs(1));

    // 3. It was committed exactly once, and nothing timed out.
    assert_eq!(network.blockchain_sizes(), vec![2, 2, 2, 2]);
    assert!(network.replicas().iter().all(|replica| replica.epoch() == Epoch::init()));
    assert!(network.is_idle());
}

#[test]
fn malformed_message_test() {
    setup_logger(LevelFilter::Debug);

    let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());

    // 1. Bytes that are not a message at all.
    let result = network.replica_mut(1).on_receive(ReplicaID::new(0), &[0xff, 0x01, 0x02]);
    assert!(matches!(result, Err(SieveError::Malformed(_))));

    // 2. A valid message followed by trailing bytes.
    let mut bytes = Message::from(OrderingMessage::request(Batch::single(b"tx0".to_vec()))).encode();
    bytes.push(0);
    let result = network.replica_mut(1).on_receive(ReplicaID::new(0), &bytes);
    assert!(matches!(result, Err(SieveError::Malformed(_))));

    // 3. A valid message from outside the replica set is ignored.
    let bytes = Message::from(OrderingMessage::request(Batch::single(b"tx0".to_vec()))).encode();
    assert!(network.replica_mut(1).on_receive(ReplicaID::new(9), &bytes).is_ok());
    assert!(network.replica(1).is_idle());

    // 4. None of this got in the way of committing a request.
    network.submit(2, Batch::single(b"tx1".to_vec()));
    let committed = network.run_until(
        |network| network.blockchain_sizes().iter().all(|size| *size == 2),
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());
}

#[test]
fn relayed_request_test() {
    setup_logger(LevelFilter::Debug);

    // A request that reaches the primary only through a peer is still proposed and committed.
    let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());
    let bytes = Message::from(OrderingMessage::request(Batch::single(b"tx1".to_vec()))).encode();
    network
        .replica_mut(0)
        .on_receive(ReplicaID::new(2), &bytes)
        .unwrap();

    let committed = network.run_until(
        |network| network.blockchain_sizes().iter().all(|size| *size == 2) && network.is_idle(),
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());
}
