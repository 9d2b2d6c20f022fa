use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use sha2::{Digest, Sha256};
use sieve_rs::{
    stack::{Stack, StackError},
    types::{
        block::{Batch, Block},
        data_types::{BlockHeight, CryptoHash},
    },
};

/// Computes the outcome of executing a batch on top of the state digest of the last committed block.
pub(crate) type OutcomeFn = Box<dyn FnMut(&CryptoHash, &Batch) -> CryptoHash + Send>;

/// An in-memory stack. The blockchain starts with the genesis block at height 0.
///
/// The ids of every transaction the stack executes are recorded in a shared log, which stays
/// readable after the stack has been moved into a replica.
pub(crate) struct MemStack {
    blocks: Vec<Block>,
    speculative: Option<CryptoHash>,
    outcome_fn: OutcomeFn,
    execute_failure: Option<String>,
    commit_failures: usize,
    executed_tx_ids: Arc<Mutex<Vec<String>>>,
}

impl MemStack {
    /// A deterministic stack: the outcome is the hash of the previous outcome and the batch digest.
    pub(crate) fn new() -> MemStack {
        MemStack::with_outcome_fn(Box::new(chained_outcome))
    }

    pub(crate) fn with_outcome_fn(outcome_fn: OutcomeFn) -> MemStack {
        MemStack {
            blocks: vec![Block::genesis()],
            speculative: None,
            outcome_fn,
            execute_failure: None,
            commit_failures: 0,
            executed_tx_ids: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every execution fail with `reason`.
    pub(crate) fn failing_executions(mut self, reason: &str) -> MemStack {
        self.execute_failure = Some(String::from(reason));
        self
    }

    /// Make the next `count` commits fail.
    pub(crate) fn failing_commits(mut self, count: usize) -> MemStack {
        self.commit_failures = count;
        self
    }

    /// A stack whose `i`-th execution yields an outcome derived from `values[i]`, and which falls back
    /// to the deterministic outcome once `values` runs out.
    pub(crate) fn scripted(values: Vec<u64>) -> MemStack {
        let mut values: VecDeque<u64> = values.into();
        MemStack::with_outcome_fn(Box::new(move |previous, batch| match values.pop_front() {
            Some(value) => {
                let mut hasher = Sha256::new();
                hasher.update(value.to_le_bytes());
                CryptoHash::new(hasher.finalize().into())
            }
            None => chained_outcome(previous, batch),
        }))
    }

    pub(crate) fn executed_tx_ids(&self) -> Arc<Mutex<Vec<String>>> {
        self.executed_tx_ids.clone()
    }

    pub(crate) fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn head(&self) -> &Block {
        // The genesis block is never removed.
        &self.blocks[self.blocks.len() - 1]
    }
}

fn chained_outcome(previous: &CryptoHash, batch: &Batch) -> CryptoHash {
    let mut hasher = Sha256::new();
    hasher.update(previous.bytes());
    hasher.update(batch.digest().bytes());
    CryptoHash::new(hasher.finalize().into())
}

impl Stack for MemStack {
    fn execute(&mut self, batch: &Batch) -> Result<CryptoHash, StackError> {
        if self.speculative.is_some() {
            return Err(StackError::ExecutionFailed {
                reason: String::from("a batch is already executing"),
            });
        }
        if let Some(reason) = &self.execute_failure {
            return Err(StackError::ExecutionFailed {
                reason: reason.clone(),
            });
        }
        self.executed_tx_ids
            .lock()
            .unwrap()
            .extend(batch.transactions.iter().map(|tx| tx.id()));
        let previous = self.head().outcome;
        let outcome = (self.outcome_fn)(&previous, batch);
        self.speculative = Some(outcome);
        Ok(outcome)
    }

    fn rollback(&mut self) -> Result<(), StackError> {
        self.speculative = None;
        Ok(())
    }

    fn commit_block(&mut self, batch: &Batch, outcome: &CryptoHash) -> Result<(), StackError> {
        if self.commit_failures > 0 {
            self.commit_failures -= 1;
            return Err(StackError::StorageFailure {
                reason: String::from("disk full"),
            });
        }
        if let Some(speculative) = self.speculative {
            if speculative != *outcome {
                return Err(StackError::StorageFailure {
                    reason: String::from("committing an outcome that differs from the executed one"),
                });
            }
        }
        let height = BlockHeight::new(self.blocks.len() as u64);
        self.blocks.push(Block::new(height, batch.clone(), *outcome));
        self.speculative = None;
        Ok(())
    }

    fn block(&self, height: BlockHeight) -> Result<Block, StackError> {
        self.blocks
            .get(height.int() as usize)
            .cloned()
            .ok_or(StackError::BlockNotFound { height })
    }

    fn blockchain_size(&self) -> Result<BlockHeight, StackError> {
        Ok(BlockHeight::new(self.blocks.len() as u64))
    }
}
