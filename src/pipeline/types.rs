/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types specific to the execute/verify pipeline.

use std::collections::{BTreeMap, HashSet};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Batch,
    crypto_primitives::VerifyingKey,
    data_types::{BlockHeight, CryptoHash, Epoch, ReplicaID, SeqNo},
    signed_messages::SignedMessage,
};

use super::messages::{Execute, Verify};

/// Lifecycle of an ordered slot.
///
/// `Ordered → Executing → AwaitingQuorum → Committed`, or `Discarded` from any non-terminal state
/// when the epoch changes or a quorum becomes unreachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Ordered,
    Executing,
    AwaitingQuorum,
    Committed,
    Discarded,
}

/// A request that the ordering core delivered, together with this replica's progress on it.
#[derive(Clone, Debug)]
pub(crate) struct Slot {
    pub(crate) epoch: Epoch,
    pub(crate) seq: SeqNo,
    pub(crate) request: CryptoHash,
    pub(crate) batch: Batch,
    pub(crate) state: SlotState,
    pub(crate) local_outcome: Option<CryptoHash>,
}

impl Slot {
    pub(crate) fn new(epoch: Epoch, seq: SeqNo, batch: Batch) -> Slot {
        Slot {
            epoch,
            seq,
            request: batch.digest(),
            batch,
            state: SlotState::Ordered,
            local_outcome: None,
        }
    }
}

/// The verified outcome of an ordered slot, proposed by the primary and ordered like any request.
///
/// `verifies` is the certificate: at least a commit quorum of signed [`Verify`] reports, from
/// distinct replicas, that agree with every other field.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Decision {
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub height: BlockHeight,
    pub batch: Batch,
    pub outcome: CryptoHash,
    pub verifies: Vec<Verify>,
}

impl Decision {
    pub fn request(&self) -> CryptoHash {
        self.batch.digest()
    }

    /// Check whether the certificate of this decision is correctly formed and signed by at least
    /// `commit_quorum` distinct members of `replicas`.
    pub(crate) fn is_correct(&self, replicas: &[VerifyingKey], commit_quorum: usize) -> bool {
        let request = self.request();
        let mut signers = HashSet::new();
        for verify in &self.verifies {
            let agrees = verify.epoch == self.epoch
                && verify.seq == self.seq
                && verify.request == request
                && verify.height == self.height
                && verify.outcome == self.outcome;
            if !agrees {
                return false;
            }
            let verifying_key = match replicas.get(verify.replica.index()) {
                Some(verifying_key) => verifying_key,
                None => return false,
            };
            if !verify.is_correct(verifying_key) || !signers.insert(verify.replica) {
                return false;
            }
        }
        signers.len() >= commit_quorum
    }
}

/// Result of evaluating a [`VerifyQuorumRecord`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Tally {
    /// Neither outcome is certain yet.
    Pending,

    /// A commit quorum of reports agrees with the primary's outcome. Holds those reports.
    Quorum(Vec<Verify>),

    /// So many reports disagree with the primary's outcome that a commit quorum can no longer form.
    Unreachable { mismatches: usize },
}

/// Transient per-slot state: the primary's proposed outcome and every report received so far.
///
/// Records only ever exist for the current epoch. Reports that arrive before the primary's
/// [`Execute`] are kept and evaluated once it arrives.
#[derive(Clone, Debug, Default)]
pub(crate) struct VerifyQuorumRecord {
    pub(crate) execute: Option<Execute>,
    reports: BTreeMap<ReplicaID, Verify>,
    pub(crate) resolved: bool,
}

impl VerifyQuorumRecord {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `verify`. Returns false if its sender already reported for this slot.
    pub(crate) fn insert(&mut self, verify: Verify) -> bool {
        if self.reports.contains_key(&verify.replica) {
            return false;
        }
        self.reports.insert(verify.replica, verify);
        true
    }

    /// Evaluate the record against `commit_quorum` in a replica set of size `n`.
    ///
    /// A quorum is unreachable once more than `n - commit_quorum` reports disagree with the
    /// primary's outcome.
    pub(crate) fn tally(&self, commit_quorum: usize, n: usize) -> Tally {
        let execute = match &self.execute {
            Some(execute) => execute,
            None => return Tally::Pending,
        };

        let (matching, mismatching): (Vec<&Verify>, Vec<&Verify>) = self
            .reports
            .values()
            .partition(|verify| verify.agrees_with(execute));

        if matching.len() >= commit_quorum {
            Tally::Quorum(matching.into_iter().cloned().collect())
        } else if mismatching.len() > n.saturating_sub(commit_quorum) {
            Tally::Unreachable {
                mismatches: mismatching.len(),
            }
        } else {
            Tally::Pending
        }
    }
}
