use log::LevelFilter;
use sieve_rs::types::block::{Batch, Transaction};

mod common;

use crate::common::{logging::setup_logger, mem_stack::MemStack, sim_network::SimNetwork};

/// Transaction ids stay short however large the transaction is.
#[test]
fn request_hash_test() {
    setup_logger(LevelFilter::Debug);

    let stack = MemStack::new();
    let executed_tx_ids = stack.executed_tx_ids();
    let mut network = SimNetwork::new(vec![stack]);

    let payload = vec![7u8; 1000];
    let tx = Transaction::new(payload.clone());
    network.submit(0, Batch::new(vec![tx.clone()]));
    assert_eq!(network.blockchain_sizes(), vec![2]);

    let executed_tx_ids = executed_tx_ids.lock().unwrap();
    assert_eq!(*executed_tx_ids, vec![tx.id()]);
    for id in executed_tx_ids.iter() {
        assert!(!id.is_empty());
        assert!(id.len() <= payload.len());
    }

    // Equal transactions have equal ids, different ones do not.
    assert_eq!(tx.id(), Transaction::new(payload).id());
    assert_ne!(tx.id(), Transaction::new(vec![7u8; 999]).id());
}
