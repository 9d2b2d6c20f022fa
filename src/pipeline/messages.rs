/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of the execute/verify
//! pipeline.
//!
//! ## Messages
//!
//! 1. [`Execute`], which the primary broadcasts after executing the next ordered slot. It carries the
//!    primary's outcome and instructs backups to execute the slot themselves.
//! 2. [`Verify`], which every replica (the primary included) broadcasts after executing a slot. It
//!    reports the replica's own outcome, and is signed so that a quorum of matching `Verify`s can
//!    serve as the certificate of a [`Decision`](super::types::Decision).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::Keypair,
    data_types::{BlockHeight, CryptoHash, Epoch, ReplicaID, SeqNo, SignatureBytes},
    signed_messages::SignedMessage,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Execute {
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub request: CryptoHash,
    pub height: BlockHeight,
    pub outcome: CryptoHash,
}

/// A replica's signed report of the outcome it computed for the slot `(epoch, seq)`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Verify {
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub request: CryptoHash,
    pub height: BlockHeight,
    pub outcome: CryptoHash,
    pub replica: ReplicaID,
    pub signature: SignatureBytes,
}

impl Verify {
    pub(crate) fn new(
        me: &Keypair,
        replica: ReplicaID,
        epoch: Epoch,
        seq: SeqNo,
        request: CryptoHash,
        height: BlockHeight,
        outcome: CryptoHash,
    ) -> Verify {
        let message = (epoch, seq, request, height, outcome, replica)
            .try_to_vec()
            .unwrap();
        let signature = me.sign(&message);
        Verify {
            epoch,
            seq,
            request,
            height,
            outcome,
            replica,
            signature,
        }
    }

    /// Check whether this report states the same outcome, for the same request at the same height,
    /// as `execute`.
    pub fn agrees_with(&self, execute: &Execute) -> bool {
        self.request == execute.request
            && self.height == execute.height
            && self.outcome == execute.outcome
    }
}

impl SignedMessage for Verify {
    fn message_bytes(&self) -> Vec<u8> {
        (
            self.epoch,
            self.seq,
            self.request,
            self.height,
            self.outcome,
            self.replica,
        )
            .try_to_vec()
            .unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}
