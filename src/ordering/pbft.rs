/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The inner ordering core: three-phase PBFT agreement on sequence numbers for payloads.
//!
//! ## Agreement
//!
//! In every epoch, the primary assigns the next sequence number to a payload and broadcasts a
//! [`PrePrepare`](super::messages::PrePrepare). Each backup acknowledges it with a `Prepare`. An
//! entry is **prepared** at a replica once it holds the pre-prepare and `quorum - 1` matching prepares
//! from distinct backups, at which point the replica broadcasts a `Commit`. An entry is
//! **committed** once a replica holds `quorum` matching commits, and is delivered once every entry with
//! a lower sequence number has been delivered.
//!
//! ## Watermarks
//!
//! A replica only keeps state for sequence numbers in the window `(last_delivered, last_delivered +
//! window]`. Messages for sequence numbers above the window are dropped, and the primary does not
//! propose past it, so a faulty replica cannot make the log grow without bound.
//!
//! ## Epochs
//!
//! The core does not decide when epochs change. The [epoch controller](crate::epoch) does, and calls
//! [`suspend`](OrderingCore::suspend) when this replica asks for a new epoch and
//! [`install`](OrderingCore::install) when it enters one.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::events::{Event, ProposeEvent};
use crate::networking::{network::Network, receiving::EpochBuffer, sending::SenderHandle};
use crate::types::data_types::{CryptoHash, Epoch, ReplicaID, ReplicaSetSize, SeqNo};

use super::messages::{Commit, OrderingMessage, Payload, PrePrepare, Prepare, PreparedEntry};

/// A payload that the ordering core delivered, in sequence order.
#[derive(Clone, Debug)]
pub(crate) struct Delivery {
    pub(crate) epoch: Epoch,
    pub(crate) seq: SeqNo,
    pub(crate) payload: Option<Payload>,
    /// Whether the entry was re-issued from an earlier epoch by an epoch change.
    pub(crate) reissued: bool,
}

#[derive(Default)]
struct LogEntry {
    pre_prepare: Option<(CryptoHash, Option<Payload>)>,
    prepares: HashMap<ReplicaID, CryptoHash>,
    commits: HashMap<ReplicaID, CryptoHash>,
    sent_commit: bool,
    committed: bool,
    reissued: bool,
}

pub(crate) struct OrderingCore<N: Network> {
    me: ReplicaID,
    size: ReplicaSetSize,
    primary_seed: u64,
    epoch: Epoch,
    active: bool,
    next_seq: SeqNo,
    last_delivered: SeqNo,
    window: u64,
    log: BTreeMap<SeqNo, LogEntry>,
    prepared: BTreeMap<SeqNo, PreparedEntry>,
    peer_delivered: Vec<SeqNo>,
    future_msgs: EpochBuffer<OrderingMessage>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> OrderingCore<N> {
    pub(crate) fn new(
        me: ReplicaID,
        size: ReplicaSetSize,
        primary_seed: u64,
        msg_buffer_capacity: usize,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            me,
            size,
            primary_seed,
            epoch: Epoch::init(),
            active: true,
            next_seq: SeqNo::init() + 1,
            last_delivered: SeqNo::init(),
            window: msg_buffer_capacity.max(1) as u64,
            log: BTreeMap::new(),
            prepared: BTreeMap::new(),
            peer_delivered: vec![SeqNo::init(); size.n()],
            future_msgs: EpochBuffer::new(msg_buffer_capacity),
            sender,
            event_publisher,
        }
    }

    pub(crate) fn primary(&self) -> ReplicaID {
        self.size.primary(self.epoch, self.primary_seed)
    }

    /// Whether this replica is the primary of the current epoch and is not waiting for a new one.
    pub(crate) fn is_acting_primary(&self) -> bool {
        self.active && self.primary() == self.me
    }

    /// Whether this replica [is the acting primary](Self::is_acting_primary) and has a free sequence
    /// number in its window.
    pub(crate) fn can_propose(&self) -> bool {
        self.is_acting_primary() && self.in_window(self.next_seq)
    }

    fn in_window(&self, seq: SeqNo) -> bool {
        seq > self.last_delivered && seq <= self.last_delivered + self.window
    }

    /// Get the number of sequence numbers that the log holds state for.
    pub(crate) fn log_len(&self) -> usize {
        self.log.len()
    }

    pub(crate) fn last_delivered(&self) -> SeqNo {
        self.last_delivered
    }

    /// Get every entry this replica has seen prepared and not yet garbage collected.
    pub(crate) fn prepared_entries(&self) -> Vec<PreparedEntry> {
        self.prepared.values().cloned().collect()
    }

    /// Assign the next sequence number to `payload` and broadcast a pre-prepare for it.
    ///
    /// # Precondition
    ///
    /// [`can_propose`](Self::can_propose).
    pub(crate) fn propose(&mut self, payload: Payload) -> Vec<Delivery> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let payload = Some(payload);
        let digest = Payload::digest(&payload);
        self.log.entry(seq).or_default().pre_prepare = Some((digest, payload.clone()));
        self.sender
            .broadcast(OrderingMessage::pre_prepare(self.epoch, seq, payload));

        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            epoch: self.epoch,
            seq,
            digest,
        })
        .publish(&self.event_publisher);

        self.try_progress(seq)
    }

    /// Process an ordering message from `origin` and return whatever it caused to be delivered.
    pub(crate) fn on_receive_msg(&mut self, origin: ReplicaID, msg: OrderingMessage) -> Vec<Delivery> {
        let epoch = match msg.epoch() {
            Some(epoch) => epoch,
            None => return Vec::new(),
        };

        if epoch < self.epoch {
            log::debug!("Dropping ordering message from {} for stale epoch {}", origin, epoch);
            return Vec::new();
        }
        if epoch > self.epoch {
            if !self.future_msgs.insert(epoch, origin, msg) {
                log::debug!("Ordering message buffer full, dropping message for epoch {}", epoch);
            }
            return Vec::new();
        }
        if !self.active {
            return Vec::new();
        }

        match msg {
            OrderingMessage::PrePrepare(pre_prepare) => self.on_receive_pre_prepare(origin, pre_prepare),
            OrderingMessage::Prepare(prepare) => self.on_receive_prepare(origin, prepare),
            OrderingMessage::Commit(commit) => self.on_receive_commit(origin, commit),
            OrderingMessage::Request(_) => Vec::new(),
        }
    }

    fn on_receive_pre_prepare(&mut self, origin: ReplicaID, pre_prepare: PrePrepare) -> Vec<Delivery> {
        if origin != self.primary() || !self.in_window(pre_prepare.seq) {
            return Vec::new();
        }

        let digest = Payload::digest(&pre_prepare.payload);
        let entry = self.log.entry(pre_prepare.seq).or_default();
        if let Some((existing, _)) = &entry.pre_prepare {
            if *existing != digest {
                log::warn!(
                    "Primary {} sent conflicting pre-prepares for seq {} in epoch {}",
                    origin,
                    pre_prepare.seq,
                    self.epoch
                );
            }
            return Vec::new();
        }
        entry.pre_prepare = Some((digest, pre_prepare.payload));

        self.send_prepare(pre_prepare.seq, digest);
        self.try_progress(pre_prepare.seq)
    }

    fn on_receive_prepare(&mut self, origin: ReplicaID, prepare: Prepare) -> Vec<Delivery> {
        if origin == self.primary() || !self.in_window(prepare.seq) {
            return Vec::new();
        }
        self.log
            .entry(prepare.seq)
            .or_default()
            .prepares
            .insert(origin, prepare.digest);
        self.try_progress(prepare.seq)
    }

    fn on_receive_commit(&mut self, origin: ReplicaID, commit: Commit) -> Vec<Delivery> {
        if let Some(delivered) = self.peer_delivered.get_mut(origin.index()) {
            if commit.last_delivered > *delivered {
                *delivered = commit.last_delivered;
                self.collect_garbage();
            }
        }

        if !self.in_window(commit.seq) {
            return Vec::new();
        }
        self.log
            .entry(commit.seq)
            .or_default()
            .commits
            .insert(origin, commit.digest);
        self.try_progress(commit.seq)
    }

    /// Backups acknowledge a pre-prepare. The primary's pre-prepare is its own acknowledgement.
    fn send_prepare(&mut self, seq: SeqNo, digest: CryptoHash) {
        if self.primary() == self.me {
            return;
        }
        self.log
            .entry(seq)
            .or_default()
            .prepares
            .insert(self.me, digest);
        self.sender
            .broadcast(OrderingMessage::prepare(self.epoch, seq, digest));
    }

    /// Move the entry at `seq` forward as far as the messages received so far allow, then deliver
    /// every committed entry that is next in line.
    fn try_progress(&mut self, seq: SeqNo) -> Vec<Delivery> {
        let quorum = self.size.quorum();
        let primary = self.primary();
        let epoch = self.epoch;
        let me = self.me;
        let last_delivered = self.last_delivered;

        if let Some(entry) = self.log.get_mut(&seq) {
            if let Some((digest, payload)) = &entry.pre_prepare {
                let digest = *digest;
                if !entry.sent_commit {
                    let prepares = entry
                        .prepares
                        .iter()
                        .filter(|(replica, d)| **replica != primary && **d == digest)
                        .count();
                    if prepares + 1 >= quorum {
                        entry.sent_commit = true;
                        entry.commits.insert(me, digest);
                        self.prepared.insert(
                            seq,
                            PreparedEntry {
                                seq,
                                epoch,
                                payload: payload.clone(),
                            },
                        );
                        self.sender.broadcast(OrderingMessage::commit(
                            epoch,
                            seq,
                            digest,
                            last_delivered,
                        ));
                    }
                }

                if entry.sent_commit && !entry.committed {
                    let commits = entry.commits.values().filter(|d| **d == digest).count();
                    entry.committed = commits >= quorum;
                }
            }
        }

        self.deliver_in_order()
    }

    fn deliver_in_order(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        loop {
            let next = self.last_delivered + 1;
            if !self.log.get(&next).is_some_and(|entry| entry.committed) {
                break;
            }
            let Some(entry) = self.log.remove(&next) else {
                break;
            };
            self.last_delivered = next;
            if let Some(delivered) = self.peer_delivered.get_mut(self.me.index()) {
                *delivered = next;
            }
            deliveries.push(Delivery {
                epoch: self.epoch,
                seq: next,
                payload: entry.pre_prepare.and_then(|(_, payload)| payload),
                reissued: entry.reissued,
            });
        }
        if !deliveries.is_empty() {
            self.collect_garbage();
        }
        deliveries
    }

    /// Drop prepared entries that every replica has already delivered.
    fn collect_garbage(&mut self) {
        let low_water = match self.peer_delivered.iter().min() {
            Some(low_water) => *low_water,
            None => return,
        };
        self.prepared = self.prepared.split_off(&(low_water + 1));
    }

    /// Stop taking part in agreement for the current epoch. Called when this replica asks for a new
    /// epoch.
    pub(crate) fn suspend(&mut self) {
        self.active = false;
    }

    /// Enter `epoch`, with `reissued` as the entries that the new primary carries over from earlier
    /// epochs. Returns whatever becomes deliverable, including through buffered messages for `epoch`.
    pub(crate) fn install(&mut self, epoch: Epoch, reissued: Vec<PreparedEntry>) -> Vec<Delivery> {
        self.epoch = epoch;
        self.active = true;
        self.log.clear();

        let highest_reissued = reissued
            .iter()
            .map(|entry| entry.seq)
            .max()
            .unwrap_or(SeqNo::init());
        self.next_seq = self.last_delivered.max(highest_reissued) + 1;

        let mut reissued_seqs = Vec::new();
        for entry in reissued {
            if entry.seq <= self.last_delivered {
                continue;
            }
            let digest = Payload::digest(&entry.payload);
            let log_entry = self.log.entry(entry.seq).or_default();
            log_entry.pre_prepare = Some((digest, entry.payload));
            log_entry.reissued = true;
            self.send_prepare(entry.seq, digest);
            reissued_seqs.push(entry.seq);
        }

        let mut deliveries = Vec::new();
        for seq in reissued_seqs {
            deliveries.extend(self.try_progress(seq));
        }
        for (origin, msg) in self.future_msgs.take(epoch) {
            deliveries.extend(self.on_receive_msg(origin, msg));
        }
        deliveries
    }
}
