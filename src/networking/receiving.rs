/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Epoch-aware buffering of received messages.
//!
//! Replicas do not enter a new epoch at exactly the same time. Messages tagged with an epoch higher
//! than the receiver's current epoch are therefore kept in an [`EpochBuffer`] and handed back once the
//! receiver enters that epoch, while messages tagged with an older epoch are simply dropped.

use std::collections::{BTreeMap, VecDeque};

use crate::types::data_types::{Epoch, ReplicaID};

/// A bounded buffer of messages from future epochs.
///
/// ## Buffer management
///
/// If the buffer is full when a message arrives, highest-epoch messages are removed first to make
/// space for it. A message whose epoch is the highest in a full buffer is not stored at all.
pub(crate) struct EpochBuffer<M> {
    capacity: usize,
    len: usize,
    buffer: BTreeMap<Epoch, VecDeque<(ReplicaID, M)>>,
}

impl<M> EpochBuffer<M> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            len: 0,
            buffer: BTreeMap::new(),
        }
    }

    /// Try inserting `msg` from `origin` for `epoch`. Returns whether the message was stored.
    pub(crate) fn insert(&mut self, epoch: Epoch, origin: ReplicaID, msg: M) -> bool {
        if self.capacity == 0 {
            return false;
        }

        if self.len >= self.capacity {
            let highest = match self.buffer.keys().next_back() {
                Some(highest) => *highest,
                None => return false,
            };
            if epoch >= highest {
                return false;
            }
            self.remove_one_from(highest);
        }

        self.buffer
            .entry(epoch)
            .or_insert_with(VecDeque::new)
            .push_back((origin, msg));
        self.len += 1;
        true
    }

    /// Remove and return every message buffered for `epoch`, in arrival order. Messages for lower
    /// epochs are discarded.
    pub(crate) fn take(&mut self, epoch: Epoch) -> Vec<(ReplicaID, M)> {
        let stale: Vec<Epoch> = self.buffer.range(..epoch).map(|(e, _)| *e).collect();
        for stale_epoch in stale {
            if let Some(msgs) = self.buffer.remove(&stale_epoch) {
                self.len -= msgs.len();
            }
        }

        match self.buffer.remove(&epoch) {
            Some(msgs) => {
                self.len -= msgs.len();
                msgs.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    fn remove_one_from(&mut self, epoch: Epoch) {
        if let Some(msgs) = self.buffer.get_mut(&epoch) {
            if msgs.pop_back().is_some() {
                self.len -= 1;
            }
            if msgs.is_empty() {
                self.buffer.remove(&epoch);
            }
        }
    }
}
