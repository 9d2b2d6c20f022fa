/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of the ordering core.
//!
//! ## Messages
//!
//! The ordering core involves four types of messages:
//! 1. [`Request`], which the replica that a client submitted a batch to broadcasts so that every
//!    replica tracks the batch as outstanding and the primary can order it.
//! 2. [`PrePrepare`], which the primary broadcasts to assign a sequence number to a payload.
//! 3. [`Prepare`], which backups broadcast to acknowledge a `PrePrepare`.
//! 4. [`Commit`], which every replica broadcasts once it has seen a quorum acknowledge a `PrePrepare`.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::pipeline::types::Decision;
use crate::types::{
    block::Batch,
    crypto_primitives::hash_parts,
    data_types::{CryptoHash, Epoch, SeqNo},
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum OrderingMessage {
    Request(Request),
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(Commit),
}

impl OrderingMessage {
    pub fn request(batch: Batch) -> OrderingMessage {
        OrderingMessage::Request(Request { batch })
    }

    pub(crate) fn pre_prepare(epoch: Epoch, seq: SeqNo, payload: Option<Payload>) -> OrderingMessage {
        OrderingMessage::PrePrepare(PrePrepare {
            epoch,
            seq,
            payload,
        })
    }

    pub(crate) fn prepare(epoch: Epoch, seq: SeqNo, digest: CryptoHash) -> OrderingMessage {
        OrderingMessage::Prepare(Prepare { epoch, seq, digest })
    }

    pub(crate) fn commit(
        epoch: Epoch,
        seq: SeqNo,
        digest: CryptoHash,
        last_delivered: SeqNo,
    ) -> OrderingMessage {
        OrderingMessage::Commit(Commit {
            epoch,
            seq,
            digest,
            last_delivered,
        })
    }

    /// Get the epoch this message was generated in. `Request`s are not scoped to an epoch.
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            OrderingMessage::Request(_) => None,
            OrderingMessage::PrePrepare(PrePrepare { epoch, .. }) => Some(*epoch),
            OrderingMessage::Prepare(Prepare { epoch, .. }) => Some(*epoch),
            OrderingMessage::Commit(Commit { epoch, .. }) => Some(*epoch),
        }
    }

    pub fn seq(&self) -> Option<SeqNo> {
        match self {
            OrderingMessage::Request(_) => None,
            OrderingMessage::PrePrepare(PrePrepare { seq, .. }) => Some(*seq),
            OrderingMessage::Prepare(Prepare { seq, .. }) => Some(*seq),
            OrderingMessage::Commit(Commit { seq, .. }) => Some(*seq),
        }
    }
}

/// A client batch to be ordered.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Request {
    pub batch: Batch,
}

/// The things the ordering core assigns sequence numbers to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Payload {
    /// A client batch. Delivering it creates an ordered slot in the execute/verify pipeline.
    Request(Batch),

    /// The verified outcome of an ordered slot. Delivering it commits a block.
    Decision(Decision),
}

impl Payload {
    /// Get the digest that `Prepare` and `Commit` messages refer to the payload (or to the null
    /// entry, if `payload` is `None`) by.
    pub fn digest(payload: &Option<Payload>) -> CryptoHash {
        hash_parts(&[&payload.try_to_vec().unwrap()])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PrePrepare {
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub payload: Option<Payload>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Prepare {
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub digest: CryptoHash,
}

/// Besides voting, a `Commit` tells its recipients how far its sender has delivered, which is what
/// garbage collection of the prepared log is based on.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Commit {
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub digest: CryptoHash,
    pub last_delivered: SeqNo,
}

/// A payload that this replica saw prepared, reported in epoch changes so that the next primary
/// re-issues it under the same sequence number.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PreparedEntry {
    pub seq: SeqNo,
    pub epoch: Epoch,
    pub payload: Option<Payload>,
}
