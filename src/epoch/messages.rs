/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of epoch change.
//!
//! ## Messages
//!
//! 1. [`EpochChange`], which a replica broadcasts to ask for a new epoch. It carries everything
//!    the replica saw prepared, so that the next primary can re-issue it.
//! 2. [`NewEpoch`], which the primary of the new epoch broadcasts once a quorum has asked for it.
//!    The `EpochChange`s it contains are the evidence that the new epoch may start, and determine
//!    which entries every replica re-issues in it.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::ordering::messages::PreparedEntry;
use crate::types::{
    crypto_primitives::Keypair,
    data_types::{Epoch, ReplicaID, SeqNo, SignatureBytes},
    signed_messages::SignedMessage,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum EpochMessage {
    EpochChange(EpochChange),
    NewEpoch(NewEpoch),
}

impl EpochMessage {
    pub fn epoch(&self) -> Epoch {
        match self {
            EpochMessage::EpochChange(EpochChange { new_epoch, .. }) => *new_epoch,
            EpochMessage::NewEpoch(NewEpoch { epoch, .. }) => *epoch,
        }
    }
}

/// A signed request to move to `new_epoch`. The signature is over every other field.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EpochChange {
    pub new_epoch: Epoch,
    pub replica: ReplicaID,
    pub last_delivered: SeqNo,
    pub prepared: Vec<PreparedEntry>,
    pub signature: SignatureBytes,
}

impl EpochChange {
    pub(crate) fn new(
        me: &Keypair,
        replica: ReplicaID,
        new_epoch: Epoch,
        last_delivered: SeqNo,
        prepared: Vec<PreparedEntry>,
    ) -> EpochChange {
        let signature = me.sign(&signed_bytes(new_epoch, replica, last_delivered, &prepared));
        EpochChange {
            new_epoch,
            replica,
            last_delivered,
            prepared,
            signature,
        }
    }
}

impl SignedMessage for EpochChange {
    fn message_bytes(&self) -> Vec<u8> {
        signed_bytes(
            self.new_epoch,
            self.replica,
            self.last_delivered,
            &self.prepared,
        )
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

fn signed_bytes(
    new_epoch: Epoch,
    replica: ReplicaID,
    last_delivered: SeqNo,
    prepared: &[PreparedEntry],
) -> Vec<u8> {
    let mut bytes = (new_epoch, replica, last_delivered).try_to_vec().unwrap();
    bytes.extend(prepared.try_to_vec().unwrap());
    bytes
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewEpoch {
    pub epoch: Epoch,
    pub epoch_changes: Vec<EpochChange>,
}
