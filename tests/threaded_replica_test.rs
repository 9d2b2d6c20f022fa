use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use log::LevelFilter;
use rand_core::OsRng;
use sieve_rs::{
    events::CommitBlockEvent,
    replica::{Configuration, Replica, ReplicaSpec},
    types::block::Batch,
};

mod common;

use crate::common::{logging::setup_logger, mem_stack::MemStack, network::mock_network};

#[test]
fn threaded_replica_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Create signing keys for 4 replicas, and a mock network connecting them.
    let mut csprg = OsRng {};
    let keypairs: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let verifying_keys: Vec<VerifyingKey> = keypairs.iter().map(|kp| kp.verifying_key()).collect();
    let network_stubs = mock_network(4);

    // 2. Start every replica on its own threads, counting the blocks each one commits.
    let commit_counts: Vec<Arc<Mutex<u64>>> = (0..4).map(|_| Arc::new(Mutex::new(0))).collect();
    let replicas: Vec<Replica> = keypairs
        .into_iter()
        .zip(network_stubs)
        .zip(commit_counts.iter().cloned())
        .map(|((keypair, network), commit_count)| {
            let configuration = Configuration::builder()
                .me(keypair)
                .replicas(verifying_keys.clone())
                .request_timeout(Duration::from_secs(2))
                .new_view_timeout(Duration::from_secs(2))
                .last_new_view_timeout(Duration::from_secs(2))
                .log_events(true)
                .build();

            ReplicaSpec::builder()
                .network(network)
                .stack(MemStack::new())
                .configuration(configuration)
                .on_commit_block(move |_: &CommitBlockEvent| *commit_count.lock().unwrap() += 1)
                .build()
                .start()
                .unwrap()
        })
        .collect();

    // 3. Submit two requests, and poll until every replica has committed both.
    log::debug!("Submitting 2 requests to replica 0.");
    replicas[0].submit(Batch::single(b"tx1".to_vec()));
    replicas[0].submit(Batch::single(b"tx2".to_vec()));

    let start = Instant::now();
    while commit_counts.iter().any(|count| *count.lock().unwrap() < 2) {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "commit counts: {:?}",
            commit_counts.iter().map(|count| *count.lock().unwrap()).collect::<Vec<_>>()
        );
        thread::sleep(Duration::from_millis(50));
    }
    assert!(commit_counts.iter().all(|count| *count.lock().unwrap() == 2));

    // 4. Dropping the handles shuts every replica down.
    drop(replicas);
}
