/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ordering adapter: the only part of Sieve that talks to the ordering core directly.
//!
//! The adapter turns client batches into [`Request`](super::messages::Request)s, keeps track of which
//! requests are still outstanding, and decides when the primary should propose them. Everything that
//! the core delivers is handed back to the [replica](crate::replica) as a [`Delivery`].
//!
//! ## Backlog
//!
//! The primary only proposes as far ahead as the ordering core's window allows. Requests it could not
//! propose stay outstanding, and decisions wait in a queue; both are proposed as soon as deliveries
//! free up the window, decisions first.
//!
//! ## Timers
//!
//! The adapter owns the two timers that drive epoch change:
//! 1. The **request timer** runs while at least one request is outstanding, and restarts every time a
//!    block is committed. Right after an epoch starts it runs with `last_new_view_timeout` instead of
//!    `request_timeout`, which gives the new primary time to re-propose.
//! 2. The **new epoch timer** runs while this replica waits for a new epoch to start. Every time it
//!    expires the replica asks for the next epoch, and its timeout doubles until an epoch starts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant, SystemTime};

use crate::events::{Event, ReceiveRequestEvent, TimerKind};
use crate::networking::{network::Network, sending::SenderHandle};
use crate::pipeline::types::Decision;
use crate::types::{
    block::Batch,
    data_types::{CryptoHash, Epoch, ReplicaID, ReplicaSetSize, SeqNo},
};

use super::pbft::{Delivery, OrderingCore};
use super::messages::{OrderingMessage, Payload, PreparedEntry};
use super::timers::Timer;

#[derive(Clone)]
pub(crate) struct OrderingConfiguration {
    pub(crate) me: ReplicaID,
    pub(crate) size: ReplicaSetSize,
    pub(crate) primary_seed: u64,
    pub(crate) request_timeout: Duration,
    pub(crate) new_view_timeout: Duration,
    pub(crate) last_new_view_timeout: Duration,
    pub(crate) msg_buffer_capacity: usize,
}

pub(crate) struct OrderingAdapter<N: Network> {
    config: OrderingConfiguration,
    core: OrderingCore<N>,
    outstanding: HashMap<CryptoHash, Batch>,
    arrival_order: VecDeque<CryptoHash>,
    proposed: HashSet<CryptoHash>,
    deferred_decisions: VecDeque<Decision>,
    committed: HashSet<CryptoHash>,
    request_timer: Timer,
    new_epoch_timer: Timer,
    new_epoch_timeout: Duration,
    fresh_epoch: bool,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> OrderingAdapter<N> {
    pub(crate) fn new(
        config: OrderingConfiguration,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let core = OrderingCore::new(
            config.me,
            config.size,
            config.primary_seed,
            config.msg_buffer_capacity,
            sender.clone(),
            event_publisher.clone(),
        );
        Self {
            new_epoch_timeout: config.new_view_timeout,
            config,
            core,
            outstanding: HashMap::new(),
            arrival_order: VecDeque::new(),
            proposed: HashSet::new(),
            deferred_decisions: VecDeque::new(),
            committed: HashSet::new(),
            request_timer: Timer::new(),
            new_epoch_timer: Timer::new(),
            fresh_epoch: false,
            sender,
            event_publisher,
        }
    }

    /// Submit a client batch for ordering. Batches that are already committed are ignored.
    pub(crate) fn submit(&mut self, batch: Batch) -> Vec<Delivery> {
        if self.committed.contains(&batch.digest()) {
            log::debug!("Ignoring resubmission of a committed request");
            return Vec::new();
        }
        self.sender.broadcast(OrderingMessage::request(batch.clone()));
        let deliveries = self.on_receive_request(self.config.me, batch);
        self.propose_backlog(deliveries)
    }

    /// Process an ordering message from `origin`.
    pub(crate) fn on_receive_msg(&mut self, origin: ReplicaID, msg: OrderingMessage) -> Vec<Delivery> {
        let deliveries = match msg {
            OrderingMessage::Request(request) => self.on_receive_request(origin, request.batch),
            msg => self.core.on_receive_msg(origin, msg),
        };
        self.propose_backlog(deliveries)
    }

    fn on_receive_request(&mut self, origin: ReplicaID, batch: Batch) -> Vec<Delivery> {
        let request = batch.digest();
        if self.committed.contains(&request) {
            return Vec::new();
        }

        if !self.outstanding.contains_key(&request) {
            self.outstanding.insert(request, batch.clone());
            self.arrival_order.push_back(request);
            Event::ReceiveRequest(ReceiveRequestEvent {
                timestamp: SystemTime::now(),
                origin,
                request,
            })
            .publish(&self.event_publisher);
        }

        if !self.request_timer.is_running() && !self.new_epoch_timer.is_running() {
            self.request_timer.start(self.request_timeout());
        }

        self.propose_request(request, batch)
    }

    /// Propose `batch` if this replica is the primary and has not yet proposed it in this epoch.
    fn propose_request(&mut self, request: CryptoHash, batch: Batch) -> Vec<Delivery> {
        if !self.core.can_propose() || self.proposed.contains(&request) {
            return Vec::new();
        }
        self.proposed.insert(request);
        self.core.propose(Payload::Request(batch))
    }

    /// Submit a verified outcome for ordering. Only the primary does this.
    pub(crate) fn propose_decision(&mut self, decision: Decision) -> Vec<Delivery> {
        if !self.core.is_acting_primary() {
            return Vec::new();
        }
        if !self.core.can_propose() {
            log::debug!("Window full, deferring the decision for seq {}", decision.seq);
            self.deferred_decisions.push_back(decision);
            return Vec::new();
        }
        let deliveries = self.core.propose(Payload::Decision(decision));
        self.propose_backlog(deliveries)
    }

    /// Once `deliveries` have moved the window, propose deferred decisions and then outstanding
    /// requests that were not proposed in this epoch yet, while the window has room.
    fn propose_backlog(&mut self, mut deliveries: Vec<Delivery>) -> Vec<Delivery> {
        if deliveries.is_empty() {
            return deliveries;
        }
        while self.core.can_propose() {
            if let Some(decision) = self.deferred_decisions.pop_front() {
                deliveries.extend(self.core.propose(Payload::Decision(decision)));
                continue;
            }
            let next = self
                .arrival_order
                .iter()
                .find(|request| !self.proposed.contains(*request))
                .and_then(|request| self.outstanding.get(request).map(|batch| (*request, batch.clone())));
            match next {
                Some((request, batch)) => {
                    self.proposed.insert(request);
                    deliveries.extend(self.core.propose(Payload::Request(batch)));
                }
                None => break,
            }
        }
        deliveries
    }

    pub(crate) fn is_committed(&self, request: &CryptoHash) -> bool {
        self.committed.contains(request)
    }

    /// Record that `request` was committed: it is no longer outstanding, and resubmissions of it are
    /// ignored from now on.
    pub(crate) fn mark_committed(&mut self, request: CryptoHash) {
        self.committed.insert(request);
        self.forget(&request);
        self.fresh_epoch = false;
        if self.outstanding.is_empty() {
            self.request_timer.stop();
        } else if !self.new_epoch_timer.is_running() {
            self.request_timer.start(self.request_timeout());
        }
    }

    /// Stop tracking `request`, whose slot could not reach a verify quorum. The client may submit it
    /// again.
    pub(crate) fn drop_request(&mut self, request: &CryptoHash) {
        self.forget(request);
        if self.outstanding.is_empty() {
            self.request_timer.stop();
        }
    }

    fn forget(&mut self, request: &CryptoHash) {
        if self.outstanding.remove(request).is_some() {
            self.arrival_order.retain(|r| r != request);
        }
    }

    pub(crate) fn has_outstanding(&self) -> bool {
        !self.outstanding.is_empty()
    }

    pub(crate) fn last_delivered(&self) -> SeqNo {
        self.core.last_delivered()
    }

    pub(crate) fn log_len(&self) -> usize {
        self.core.log_len()
    }

    pub(crate) fn prepared_entries(&self) -> Vec<PreparedEntry> {
        self.core.prepared_entries()
    }

    /// Check both timers against `now`, and return the one that expired, if any.
    pub(crate) fn tick(&mut self, now: Instant) -> Option<TimerKind> {
        if self.request_timer.expire(now) {
            return Some(TimerKind::Request);
        }
        if self.new_epoch_timer.expire(now) {
            self.new_epoch_timeout = self.new_epoch_timeout.saturating_mul(2);
            return Some(TimerKind::NewEpoch);
        }
        None
    }

    /// Called when this replica broadcasts an epoch change: stop ordering, stop waiting for requests,
    /// and start waiting for the new epoch.
    pub(crate) fn on_epoch_change_started(&mut self) {
        self.core.suspend();
        self.request_timer.stop();
        self.new_epoch_timer.start(self.new_epoch_timeout);
    }

    /// Enter `epoch` with the entries re-issued by its primary. If this replica is the new primary,
    /// it re-proposes every outstanding request in the order it first received them.
    pub(crate) fn install(&mut self, epoch: Epoch, reissued: Vec<PreparedEntry>) -> Vec<Delivery> {
        self.new_epoch_timer.stop();
        self.new_epoch_timeout = self.config.new_view_timeout;
        self.proposed.clear();
        self.deferred_decisions.clear();

        let mut deliveries = self.core.install(epoch, reissued);

        if self.outstanding.is_empty() {
            self.fresh_epoch = false;
            self.request_timer.stop();
        } else {
            self.fresh_epoch = true;
            self.request_timer.start(self.request_timeout());
        }

        let pending: Vec<CryptoHash> = self.arrival_order.iter().copied().collect();
        for request in pending {
            if let Some(batch) = self.outstanding.get(&request).cloned() {
                deliveries.extend(self.propose_request(request, batch));
            }
        }
        self.propose_backlog(deliveries)
    }

    pub(crate) fn primary(&self) -> ReplicaID {
        self.core.primary()
    }

    fn request_timeout(&self) -> Duration {
        if self.fresh_epoch {
            self.config.last_new_view_timeout
        } else {
            self.config.request_timeout
        }
    }
}
