/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of Sieve events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Every event carries the
//! time at which it was emitted.
//!
//! Library users can register handlers for events through the optional setters of
//! [`ReplicaSpec`](crate::replica::ReplicaSpec), and events are logged by the default handlers in
//! [`logging`](crate::logging) if [`log_events`](crate::replica::Configuration::log_events) is set.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::pipeline::messages::{Execute, Verify};
use crate::types::data_types::{BlockHeight, CryptoHash, Epoch, ReplicaID, SeqNo};

/// Enumerates all events defined for Sieve.
pub enum Event {
    // Events that involve ordering.
    ReceiveRequest(ReceiveRequestEvent),
    Propose(ProposeEvent),
    OrderSlot(OrderSlotEvent),
    // Events that involve executing and verifying a slot.
    Execute(ExecuteEvent),
    ReceiveExecute(ReceiveExecuteEvent),
    Verify(VerifyEvent),
    ReceiveVerify(ReceiveVerifyEvent),
    ProposeDecision(ProposeDecisionEvent),
    CommitBlock(CommitBlockEvent),
    DiscardSlot(DiscardSlotEvent),
    QuorumUnreachable(QuorumUnreachableEvent),
    // Events that involve epoch change.
    Timeout(TimeoutEvent),
    StartEpochChange(StartEpochChangeEvent),
    StartEpoch(StartEpochEvent),
}

impl Event {
    /// Publish the event on the `event_publisher` channel, if there is one.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The subscriber only disappears while the replica is shutting down.
            let _ = event_publisher.send(self);
        }
    }
}

/// A replica started tracking a client request as outstanding.
pub struct ReceiveRequestEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaID,
    pub request: CryptoHash,
}

/// The primary assigned a sequence number to a payload and broadcast a pre-prepare for it.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub digest: CryptoHash,
}

/// The ordering core delivered a request, creating an ordered slot.
pub struct OrderSlotEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub request: CryptoHash,
}

/// The primary executed a slot and broadcast its execute instruction.
pub struct ExecuteEvent {
    pub timestamp: SystemTime,
    pub execute: Execute,
}

pub struct ReceiveExecuteEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaID,
    pub execute: Execute,
}

/// A replica executed a slot and broadcast its report.
pub struct VerifyEvent {
    pub timestamp: SystemTime,
    pub verify: Verify,
}

pub struct ReceiveVerifyEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaID,
    pub verify: Verify,
}

/// The primary collected a commit quorum of reports and submitted the decision for ordering.
pub struct ProposeDecisionEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub outcome: CryptoHash,
}

/// A block was appended to the stack.
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub request: CryptoHash,
    pub outcome: CryptoHash,
    /// Whether this replica's own outcome differed from the committed one and was rolled back.
    pub rolled_back: bool,
}

/// A slot was dropped without being committed.
pub struct DiscardSlotEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub request: CryptoHash,
}

/// Reports for a slot disagree so much that it can never be committed.
pub struct QuorumUnreachableEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub seq: SeqNo,
    pub mismatches: usize,
}

/// Which timer expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Request,
    NewEpoch,
}

pub struct TimeoutEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub timer: TimerKind,
}

/// The replica broadcast an epoch change asking for `new_epoch`.
pub struct StartEpochChangeEvent {
    pub timestamp: SystemTime,
    pub new_epoch: Epoch,
}

/// The replica entered `epoch`, whose primary is `primary`.
pub struct StartEpochEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub primary: ReplicaID,
}
