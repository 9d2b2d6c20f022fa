use std::time::Duration;

use log::LevelFilter;
use sieve_rs::{
    networking::messages::Message,
    ordering::messages::{Commit, OrderingMessage, Prepare},
    pipeline::messages::Execute,
    types::{
        block::Batch,
        data_types::{BlockHeight, CryptoHash, Epoch, ReplicaID, SeqNo},
    },
};

mod common;

use crate::common::{logging::setup_logger, mem_stack::MemStack, sim_network::SimNetwork};

// Default message buffer capacity, which is also the width of the sequence number window.
const WINDOW: usize = 1024;

/// A faulty backup floods replica 1 with prepares and commits for 20,000 distinct sequence numbers,
/// and a faulty primary adds execute instructions for sequence numbers far ahead. Replica 1 keeps
/// state for at most one window of them, and the replica set still commits afterwards.
#[test]
fn out_of_window_flood_test() {
    setup_logger(LevelFilter::Warn);

    let mut network = SimNetwork::new((0..4).map(|_| MemStack::new()).collect());

    // 1. Flood replica 1.
    let junk = CryptoHash::new([7; 32]);
    for seq in 1..=20_000u64 {
        let prepare = Message::from(OrderingMessage::Prepare(Prepare {
            epoch: Epoch::init(),
            seq: SeqNo::new(seq),
            digest: junk,
        }));
        let commit = Message::from(OrderingMessage::Commit(Commit {
            epoch: Epoch::init(),
            seq: SeqNo::new(seq),
            digest: junk,
            last_delivered: SeqNo::init(),
        }));
        let replica = network.replica_mut(1);
        replica.on_receive(ReplicaID::new(3), &prepare.encode()).unwrap();
        replica.on_receive(ReplicaID::new(3), &commit.encode()).unwrap();

        if seq > WINDOW as u64 {
            let execute = Message::from(Execute {
                epoch: Epoch::init(),
                seq: SeqNo::new(seq),
                request: junk,
                height: BlockHeight::new(1),
                outcome: junk,
            });
            replica.on_receive(ReplicaID::new(0), &execute.encode()).unwrap();
        }
    }
    assert!(
        network.replica(1).tracked_seqs() <= WINDOW,
        "tracked seqs: {}",
        network.replica(1).tracked_seqs()
    );

    // 2. The flood does not keep the replica set from committing.
    network.submit(0, Batch::single(b"tx1".to_vec()));
    let committed = network.run_until(
        |network| network.blockchain_sizes().iter().all(|size| *size == 2),
        Duration::from_secs(5),
    );
    assert!(committed, "blockchain sizes: {:?}", network.blockchain_sizes());
    assert!(network.replica(1).tracked_seqs() <= WINDOW);
}
