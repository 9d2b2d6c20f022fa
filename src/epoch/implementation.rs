/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-oriented implementation of the epoch change protocol.
//!
//! The controller only keeps the latest [`EpochChange`] it received from each replica. It never
//! touches the ordering core or the pipeline itself: it returns an [`EpochDecision`] and leaves it to
//! the [replica](crate::replica) to carry it out.

use std::collections::{BTreeMap, HashSet};
use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::events::{Event, StartEpochChangeEvent, StartEpochEvent};
use crate::networking::{network::Network, sending::SenderHandle};
use crate::ordering::messages::PreparedEntry;
use crate::types::{
    crypto_primitives::{Keypair, VerifyingKey},
    data_types::{Epoch, ReplicaID, ReplicaSetSize, SeqNo},
    signed_messages::SignedMessage,
};

use super::messages::{EpochChange, NewEpoch};

#[derive(Clone)]
pub(crate) struct EpochConfiguration {
    pub(crate) me: ReplicaID,
    pub(crate) keypair: Keypair,
    pub(crate) replicas: Vec<VerifyingKey>,
    pub(crate) size: ReplicaSetSize,
    pub(crate) primary_seed: u64,
}

/// Everything a replica needs to enter a new epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NewEpochPlan {
    pub(crate) epoch: Epoch,
    pub(crate) reissued: Vec<PreparedEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EpochDecision {
    Nothing,

    /// Enough replicas are ahead of this one that it should ask for this epoch too.
    Join(Epoch),

    Install(NewEpochPlan),
}

pub(crate) struct EpochController<N: Network> {
    config: EpochConfiguration,
    epoch: Epoch,
    changing_to: Option<Epoch>,
    latest_changes: BTreeMap<ReplicaID, EpochChange>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> EpochController<N> {
    pub(crate) fn new(
        config: EpochConfiguration,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            epoch: Epoch::init(),
            changing_to: None,
            latest_changes: BTreeMap::new(),
            sender,
            event_publisher,
        }
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub(crate) fn in_epoch_change(&self) -> bool {
        self.changing_to.is_some()
    }

    pub(crate) fn changing_to(&self) -> Option<Epoch> {
        self.changing_to
    }

    /// The epoch to ask for when a timer expires: one past the epoch this replica is currently
    /// asking for, or one past the current epoch.
    pub(crate) fn next_target(&self) -> Epoch {
        match self.changing_to {
            Some(changing_to) => changing_to + 1,
            None => self.epoch + 1,
        }
    }

    /// Whether this replica is neither in nor asking for `new_epoch` or a later epoch.
    pub(crate) fn is_behind(&self, new_epoch: Epoch) -> bool {
        new_epoch > self.epoch && self.changing_to.map_or(true, |target| target < new_epoch)
    }

    fn primary_of(&self, epoch: Epoch) -> ReplicaID {
        self.config.size.primary(epoch, self.config.primary_seed)
    }

    /// Broadcast a signed request to move to `new_epoch`, carrying the given ordering state.
    ///
    /// Does nothing unless this replica [is behind](Self::is_behind) `new_epoch`.
    pub(crate) fn start_epoch_change(
        &mut self,
        new_epoch: Epoch,
        last_delivered: SeqNo,
        prepared: Vec<PreparedEntry>,
    ) -> EpochDecision {
        if !self.is_behind(new_epoch) {
            return EpochDecision::Nothing;
        }
        self.changing_to = Some(new_epoch);

        let epoch_change = EpochChange::new(
            &self.config.keypair,
            self.config.me,
            new_epoch,
            last_delivered,
            prepared,
        );
        self.sender.broadcast(epoch_change.clone());
        Event::StartEpochChange(StartEpochChangeEvent {
            timestamp: SystemTime::now(),
            new_epoch,
        })
        .publish(&self.event_publisher);

        self.record(epoch_change);
        self.try_new_epoch(new_epoch)
    }

    pub(crate) fn on_receive_epoch_change(
        &mut self,
        origin: ReplicaID,
        epoch_change: EpochChange,
    ) -> EpochDecision {
        if epoch_change.replica != origin {
            log::warn!(
                "Ignoring EpochChange from {} that claims to be from {}",
                origin,
                epoch_change.replica
            );
            return EpochDecision::Nothing;
        }
        if epoch_change.new_epoch <= self.epoch {
            return EpochDecision::Nothing;
        }
        if !self.is_correctly_signed(&epoch_change) {
            log::warn!("Ignoring incorrectly signed EpochChange from {}", origin);
            return EpochDecision::Nothing;
        }

        let new_epoch = epoch_change.new_epoch;
        self.record(epoch_change);

        // f+1 replicas asking for a later epoch include at least one correct replica.
        let floor = self.changing_to.unwrap_or(self.epoch).max(self.epoch);
        let ahead: Vec<&EpochChange> = self
            .latest_changes
            .values()
            .filter(|epoch_change| epoch_change.new_epoch > floor)
            .collect();
        if ahead.len() > self.config.size.f() {
            if let Some(join) = ahead.iter().map(|epoch_change| epoch_change.new_epoch).min() {
                return EpochDecision::Join(join);
            }
        }

        self.try_new_epoch(new_epoch)
    }

    pub(crate) fn on_receive_new_epoch(&mut self, origin: ReplicaID, new_epoch: NewEpoch) -> EpochDecision {
        if new_epoch.epoch <= self.epoch {
            return EpochDecision::Nothing;
        }
        if origin != self.primary_of(new_epoch.epoch) {
            log::warn!(
                "Ignoring NewEpoch for epoch {} from {}, who is not its primary",
                new_epoch.epoch,
                origin
            );
            return EpochDecision::Nothing;
        }

        let mut signers = HashSet::new();
        for epoch_change in &new_epoch.epoch_changes {
            if epoch_change.new_epoch != new_epoch.epoch || !self.is_correctly_signed(epoch_change) {
                log::warn!("Ignoring NewEpoch for epoch {} with an invalid EpochChange", new_epoch.epoch);
                return EpochDecision::Nothing;
            }
            signers.insert(epoch_change.replica);
        }
        if signers.len() < self.config.size.quorum() {
            log::warn!(
                "Ignoring NewEpoch for epoch {} backed by only {} replicas",
                new_epoch.epoch,
                signers.len()
            );
            return EpochDecision::Nothing;
        }

        EpochDecision::Install(NewEpochPlan {
            epoch: new_epoch.epoch,
            reissued: reissued_entries(new_epoch.epoch, &new_epoch.epoch_changes),
        })
    }

    /// Record that this replica entered `epoch`.
    pub(crate) fn installed(&mut self, epoch: Epoch) {
        self.epoch = epoch;
        self.changing_to = None;
        self.latest_changes
            .retain(|_, epoch_change| epoch_change.new_epoch > epoch);

        Event::StartEpoch(StartEpochEvent {
            timestamp: SystemTime::now(),
            epoch,
            primary: self.primary_of(epoch),
        })
        .publish(&self.event_publisher);
    }

    fn record(&mut self, epoch_change: EpochChange) {
        let newer = self
            .latest_changes
            .get(&epoch_change.replica)
            .map_or(true, |known| known.new_epoch < epoch_change.new_epoch);
        if newer {
            self.latest_changes.insert(epoch_change.replica, epoch_change);
        }
    }

    fn is_correctly_signed(&self, epoch_change: &EpochChange) -> bool {
        self.config
            .replicas
            .get(epoch_change.replica.index())
            .is_some_and(|verifying_key| epoch_change.is_correct(verifying_key))
    }

    /// If this replica is the primary of `epoch`, has asked for it itself, and holds a quorum of
    /// requests for it, start it.
    fn try_new_epoch(&mut self, epoch: Epoch) -> EpochDecision {
        if self.changing_to != Some(epoch) || self.primary_of(epoch) != self.config.me {
            return EpochDecision::Nothing;
        }
        let epoch_changes: Vec<EpochChange> = self
            .latest_changes
            .values()
            .filter(|epoch_change| epoch_change.new_epoch == epoch)
            .cloned()
            .collect();
        if epoch_changes.len() < self.config.size.quorum() {
            return EpochDecision::Nothing;
        }

        let reissued = reissued_entries(epoch, &epoch_changes);
        self.sender.broadcast(NewEpoch {
            epoch,
            epoch_changes,
        });
        EpochDecision::Install(NewEpochPlan { epoch, reissued })
    }
}

/// Compute the entries that must be re-issued in `epoch`, given the epoch changes that justify it.
///
/// Every sequence number above the lowest `last_delivered` and up to the highest prepared sequence
/// number is re-issued. Each gets the payload prepared in the highest epoch, or no payload at all if
/// no replica reported one.
pub(crate) fn reissued_entries(epoch: Epoch, epoch_changes: &[EpochChange]) -> Vec<PreparedEntry> {
    let low = match epoch_changes
        .iter()
        .map(|epoch_change| epoch_change.last_delivered)
        .min()
    {
        Some(low) => low,
        None => return Vec::new(),
    };

    let mut chosen: BTreeMap<SeqNo, &PreparedEntry> = BTreeMap::new();
    for entry in epoch_changes
        .iter()
        .flat_map(|epoch_change| epoch_change.prepared.iter())
        .filter(|entry| entry.seq > low)
    {
        let replace = chosen
            .get(&entry.seq)
            .map_or(true, |current| current.epoch < entry.epoch);
        if replace {
            chosen.insert(entry.seq, entry);
        }
    }

    let high = match chosen.keys().next_back() {
        Some(high) => *high,
        None => return Vec::new(),
    };

    let mut reissued = Vec::new();
    let mut seq = low + 1;
    while seq <= high {
        reissued.push(match chosen.get(&seq) {
            Some(entry) => (*entry).clone(),
            None => PreparedEntry {
                seq,
                epoch,
                payload: None,
            },
        });
        seq += 1;
    }
    reissued
}
