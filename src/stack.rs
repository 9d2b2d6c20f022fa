/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable execution and ledger stack.
//!
//! Sieve does not execute transactions or store blocks itself. Instead, library users supply a type
//! that implements [`Stack`], and the [execute/verify pipeline](crate::pipeline) calls into it:
//! 1. [`execute`](Stack::execute) runs a batch speculatively against the current ledger state and
//!    returns a digest of the resulting state.
//! 2. [`rollback`](Stack::rollback) discards the speculative state of the last `execute`.
//! 3. [`commit_block`](Stack::commit_block) appends a block containing the batch and its canonical
//!    outcome, making the state that corresponds to that outcome the committed state.
//!
//! Every call into the stack is made from the replica's single event-processing loop, so no two
//! batches ever execute concurrently on one replica.

use std::fmt::{self, Display, Formatter};

use crate::types::{
    block::{Batch, Block},
    crypto_primitives::hash_parts,
    data_types::{BlockHeight, CryptoHash},
};

pub trait Stack: Send + 'static {
    /// Execute `batch` on top of the committed state and return a digest of the resulting state.
    ///
    /// Implementations may be non-deterministic. Divergent digests are detected by the verify phase.
    fn execute(&mut self, batch: &Batch) -> Result<CryptoHash, StackError>;

    /// Discard any speculative state created by [`execute`](Self::execute). Must succeed if nothing
    /// is executing.
    fn rollback(&mut self) -> Result<(), StackError>;

    /// Persist a new block at height [`blockchain_size`](Self::blockchain_size) containing `batch`
    /// and the canonical `outcome`.
    ///
    /// The canonical outcome is not necessarily the outcome that this stack computed for `batch`.
    /// Sieve calls [`rollback`](Self::rollback) before committing a batch whose local execution
    /// diverged.
    fn commit_block(&mut self, batch: &Batch, outcome: &CryptoHash) -> Result<(), StackError>;

    /// Get the committed block at `height`.
    fn block(&self, height: BlockHeight) -> Result<Block, StackError>;

    /// Get the number of committed blocks, including the genesis block.
    fn blockchain_size(&self) -> Result<BlockHeight, StackError>;
}

/// Get the outcome digest that stands for a failed execution.
///
/// Replicas that fail to execute a batch in the same way produce the same digest, so an execution
/// failure can itself reach a verify quorum and be committed.
pub fn execution_error_outcome(error: &StackError) -> CryptoHash {
    hash_parts(&[b"execution error", error.to_string().as_bytes()])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    ExecutionFailed { reason: String },
    BlockNotFound { height: BlockHeight },
    StorageFailure { reason: String },
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StackError::ExecutionFailed { reason } => write!(f, "execution failed: {}", reason),
            StackError::BlockNotFound { height } => write!(f, "no block at height {}", height),
            StackError::StorageFailure { reason } => write!(f, "storage failure: {}", reason),
        }
    }
}

impl std::error::Error for StackError {}
