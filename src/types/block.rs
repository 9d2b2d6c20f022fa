/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transactions, batches of transactions, and the blocks that record them.
//!
//! A [`Batch`] is the unit that clients submit and that Sieve orders: its [`digest`](Batch::digest)
//! identifies the request everywhere in the protocol, so submitting the same batch twice names the
//! same request. A [`Block`] is what the [`Stack`](crate::stack::Stack) persists once a batch has been
//! ordered, executed, and verified.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

use super::crypto_primitives::hash_parts;
use super::data_types::{BlockHeight, CryptoHash};

/// A single client transaction. Its contents are opaque to Sieve.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(payload: Vec<u8>) -> Transaction {
        Transaction { payload }
    }

    /// Get the identifier of this transaction: the unpadded Base64 encoding of the SHA256 hash of the
    /// transaction. Always 43 characters long, however large the payload.
    pub fn id(&self) -> String {
        let digest = hash_parts(&[&self.try_to_vec().unwrap()]);
        STANDARD_NO_PAD.encode(digest.bytes())
    }
}

/// An ordered list of transactions submitted together as one request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Batch {
    pub transactions: Vec<Transaction>,
}

impl Batch {
    pub fn new(transactions: Vec<Transaction>) -> Batch {
        Batch { transactions }
    }

    /// Create a batch that contains a single transaction carrying `payload`.
    pub fn single(payload: Vec<u8>) -> Batch {
        Batch::new(vec![Transaction::new(payload)])
    }

    /// The request digest: SHA256 of the Borsh serialization of this batch.
    pub fn digest(&self) -> CryptoHash {
        hash_parts(&[&self.try_to_vec().unwrap()])
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// A committed block: an ordered batch together with its canonical execution outcome.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub hash: CryptoHash,
    pub batch: Batch,
    pub outcome: CryptoHash,
}

impl Block {
    pub fn new(height: BlockHeight, batch: Batch, outcome: CryptoHash) -> Block {
        Block {
            height,
            hash: Block::hash(height, &batch.digest(), &outcome),
            batch,
            outcome,
        }
    }

    /// The block at height 0, which every blockchain starts with.
    pub fn genesis() -> Block {
        Block::new(BlockHeight::new(0), Batch::default(), CryptoHash::new([0u8; 32]))
    }

    pub fn hash(height: BlockHeight, batch_digest: &CryptoHash, outcome: &CryptoHash) -> CryptoHash {
        hash_parts(&[
            &height.try_to_vec().unwrap(),
            &batch_digest.bytes(),
            &outcome.bytes(),
        ])
    }

    /// Checks if `hash` matches the rest of the block.
    pub fn is_correct(&self) -> bool {
        self.hash == Block::hash(self.height, &self.batch.digest(), &self.outcome)
    }
}
