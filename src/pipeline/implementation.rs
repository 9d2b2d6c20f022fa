/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-oriented implementation of the execute/verify pipeline.
//!
//! Slots are executed strictly one at a time, in the order the ordering core delivered them. The
//! slot at the front of the queue is the only one that may be executing or awaiting a quorum; the
//! slots behind it wait until it is committed.
//!
//! Like the ordering core, the pipeline only keeps verify quorum records for sequence numbers within
//! a window above the highest committed one.

use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::events::*;
use crate::networking::{network::Network, receiving::EpochBuffer, sending::SenderHandle};
use crate::stack::{execution_error_outcome, Stack, StackError};
use crate::types::{
    block::Batch,
    crypto_primitives::{Keypair, VerifyingKey},
    data_types::{BlockHeight, CryptoHash, Epoch, ReplicaID, ReplicaSetSize, SeqNo},
    signed_messages::SignedMessage,
};

use super::messages::{Execute, Verify};
use super::types::{Decision, Slot, SlotState, Tally, VerifyQuorumRecord};

#[derive(Clone)]
pub(crate) struct PipelineConfiguration {
    pub(crate) me: ReplicaID,
    pub(crate) keypair: Keypair,
    pub(crate) replicas: Vec<VerifyingKey>,
    pub(crate) size: ReplicaSetSize,
    pub(crate) primary_seed: u64,
    pub(crate) commit_quorum: usize,
    pub(crate) msg_buffer_capacity: usize,
}

/// What the pipeline asks the rest of the replica to do.
#[derive(Clone, Debug)]
pub(crate) enum PipelineOutput {
    /// Order this decision. Only ever produced at the primary.
    ProposeDecision(Decision),

    /// `request` was committed.
    Committed { request: CryptoHash },

    /// The slot `(epoch, seq)` holding `request` can never be committed. The primary that proposed
    /// its outcome should be replaced.
    QuorumUnreachable {
        epoch: Epoch,
        seq: SeqNo,
        request: CryptoHash,
    },

    /// The stack failed to commit the decided block for `request`. The slot was discarded, and this
    /// replica's ledger no longer matches the rest of the replica set.
    CommitFailed {
        epoch: Epoch,
        seq: SeqNo,
        request: CryptoHash,
        error: StackError,
    },

    /// A call into the stack failed. The pipeline went on without its result.
    StackFailed(StackError),
}

enum PipelineMessage {
    Execute(Execute),
    Verify(Verify),
}

pub(crate) struct Pipeline<N: Network> {
    config: PipelineConfiguration,
    epoch: Epoch,
    slots: VecDeque<Slot>,
    records: BTreeMap<SeqNo, VerifyQuorumRecord>,
    committed_through: SeqNo,
    speculative: bool,
    future_msgs: EpochBuffer<PipelineMessage>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> Pipeline<N> {
    pub(crate) fn new(
        config: PipelineConfiguration,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            future_msgs: EpochBuffer::new(config.msg_buffer_capacity),
            config,
            epoch: Epoch::init(),
            slots: VecDeque::new(),
            records: BTreeMap::new(),
            committed_through: SeqNo::init(),
            speculative: false,
            sender,
            event_publisher,
        }
    }

    fn primary(&self) -> ReplicaID {
        self.config.size.primary(self.epoch, self.config.primary_seed)
    }

    fn is_primary(&self) -> bool {
        self.primary() == self.config.me
    }

    /// Whether no ordered slot is waiting to be committed.
    pub(crate) fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    fn in_window(&self, seq: SeqNo) -> bool {
        seq > self.committed_through
            && seq <= self.committed_through + self.config.msg_buffer_capacity.max(1) as u64
    }

    pub(crate) fn records_len(&self) -> usize {
        self.records.len()
    }

    /// Get the sequence number and state of every slot that is not yet committed, front first.
    pub(crate) fn slot_states(&self) -> Vec<(SeqNo, SlotState)> {
        self.slots.iter().map(|slot| (slot.seq, slot.state)).collect()
    }

    /// Queue a newly ordered request, and start executing it if it is next in line.
    pub(crate) fn on_ordered<S: Stack>(
        &mut self,
        epoch: Epoch,
        seq: SeqNo,
        batch: Batch,
        stack: &mut S,
    ) -> Result<Vec<PipelineOutput>, StackError> {
        if epoch != self.epoch {
            log::debug!("Ignoring slot {} ordered in epoch {} during epoch {}", seq, epoch, self.epoch);
            return Ok(Vec::new());
        }

        let slot = Slot::new(epoch, seq, batch);
        if self.slots.iter().any(|queued| queued.request == slot.request) {
            log::debug!("Request ordered again at seq {} is already queued", seq);
            return Ok(Vec::new());
        }

        let unreachable = self.records.get(&seq).is_some_and(|record| {
            record.resolved
                && matches!(
                    record.tally(self.config.commit_quorum, self.config.size.n()),
                    Tally::Unreachable { .. }
                )
        });
        if unreachable {
            log::debug!("Slot {} was ordered after its quorum became unreachable", seq);
            self.discard(slot);
            return Ok(Vec::new());
        }

        Event::OrderSlot(OrderSlotEvent {
            timestamp: SystemTime::now(),
            epoch,
            seq,
            request: slot.request,
        })
        .publish(&self.event_publisher);

        self.slots.push_back(slot);
        self.advance(stack)
    }

    /// Execute the slot at the front of the queue if it may be executed now.
    ///
    /// The primary executes as soon as the slot is at the front. Backups wait until the primary's
    /// `Execute` for the slot has arrived, and only execute if it names the same request at the same
    /// height.
    fn advance<S: Stack>(&mut self, stack: &mut S) -> Result<Vec<PipelineOutput>, StackError> {
        let (seq, request, state) = match self.slots.front() {
            Some(slot) => (slot.seq, slot.request, slot.state),
            None => return Ok(Vec::new()),
        };
        if state != SlotState::Ordered {
            return self.evaluate(seq, stack);
        }

        let height = stack.blockchain_size()?;
        if self.is_primary() {
            let outcome = match self.execute_front(stack) {
                Some(outcome) => outcome,
                None => return Ok(Vec::new()),
            };
            let execute = Execute {
                epoch: self.epoch,
                seq,
                request,
                height,
                outcome,
            };
            self.records.entry(seq).or_insert_with(VerifyQuorumRecord::new).execute =
                Some(execute.clone());
            self.sender.broadcast(execute.clone());
            Event::Execute(ExecuteEvent {
                timestamp: SystemTime::now(),
                execute,
            })
            .publish(&self.event_publisher);
            self.send_verify(seq, request, height, outcome);
        } else {
            let execute = match self.records.get(&seq).and_then(|record| record.execute.clone()) {
                Some(execute) => execute,
                None => return Ok(Vec::new()),
            };
            if execute.request != request || execute.height != height {
                log::warn!(
                    "Execute for seq {} in epoch {} does not match the ordered request at height {}",
                    seq,
                    self.epoch,
                    height
                );
                return Ok(Vec::new());
            }
            let outcome = match self.execute_front(stack) {
                Some(outcome) => outcome,
                None => return Ok(Vec::new()),
            };
            self.send_verify(seq, request, height, outcome);
        }

        self.evaluate(seq, stack)
    }

    /// Execute the batch of the front slot. A failed execution yields the outcome that stands for
    /// that failure.
    fn execute_front<S: Stack>(&mut self, stack: &mut S) -> Option<CryptoHash> {
        let slot = self.slots.front_mut()?;
        slot.state = SlotState::Executing;
        let outcome = match stack.execute(&slot.batch) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("Execution of seq {} failed: {}", slot.seq, err);
                execution_error_outcome(&err)
            }
        };
        self.speculative = true;
        slot.local_outcome = Some(outcome);
        slot.state = SlotState::AwaitingQuorum;
        Some(outcome)
    }

    fn send_verify(&mut self, seq: SeqNo, request: CryptoHash, height: BlockHeight, outcome: CryptoHash) {
        let verify = Verify::new(
            &self.config.keypair,
            self.config.me,
            self.epoch,
            seq,
            request,
            height,
            outcome,
        );
        self.records
            .entry(seq)
            .or_insert_with(VerifyQuorumRecord::new)
            .insert(verify.clone());
        self.sender.broadcast(verify.clone());
        Event::Verify(VerifyEvent {
            timestamp: SystemTime::now(),
            verify,
        })
        .publish(&self.event_publisher);
    }

    /// Evaluate the verify quorum record for `seq`, and act on it if it has become decisive.
    fn evaluate<S: Stack>(&mut self, seq: SeqNo, stack: &mut S) -> Result<Vec<PipelineOutput>, StackError> {
        let tally = match self.records.get(&seq) {
            Some(record) if !record.resolved => {
                record.tally(self.config.commit_quorum, self.config.size.n())
            }
            _ => return Ok(Vec::new()),
        };

        match tally {
            Tally::Pending => Ok(Vec::new()),

            Tally::Quorum(verifies) => {
                if !self.is_primary() {
                    self.mark_resolved(seq);
                    return Ok(Vec::new());
                }
                let execute = match self.records.get(&seq).and_then(|record| record.execute.clone()) {
                    Some(execute) => execute,
                    None => return Ok(Vec::new()),
                };
                let batch = match self
                    .slots
                    .iter()
                    .find(|slot| slot.seq == seq && slot.state == SlotState::AwaitingQuorum)
                {
                    Some(slot) => slot.batch.clone(),
                    None => return Ok(Vec::new()),
                };
                self.mark_resolved(seq);

                Event::ProposeDecision(ProposeDecisionEvent {
                    timestamp: SystemTime::now(),
                    epoch: self.epoch,
                    seq,
                    outcome: execute.outcome,
                })
                .publish(&self.event_publisher);

                Ok(vec![PipelineOutput::ProposeDecision(Decision {
                    epoch: self.epoch,
                    seq,
                    height: execute.height,
                    batch,
                    outcome: execute.outcome,
                    verifies,
                })])
            }

            Tally::Unreachable { mismatches } => {
                self.mark_resolved(seq);
                Event::QuorumUnreachable(QuorumUnreachableEvent {
                    timestamp: SystemTime::now(),
                    epoch: self.epoch,
                    seq,
                    mismatches,
                })
                .publish(&self.event_publisher);

                let mut outputs = Vec::new();
                let request = match self.slots.iter().position(|slot| slot.seq == seq) {
                    Some(position) => {
                        if position == 0 {
                            outputs.extend(self.roll_back(stack));
                        }
                        match self.slots.remove(position) {
                            Some(slot) => {
                                self.discard(slot.clone());
                                slot.request
                            }
                            None => return Ok(outputs),
                        }
                    }
                    None => match self.records.get(&seq).and_then(|record| record.execute.as_ref()) {
                        Some(execute) => execute.request,
                        None => return Ok(outputs),
                    },
                };

                outputs.push(PipelineOutput::QuorumUnreachable {
                    epoch: self.epoch,
                    seq,
                    request,
                });
                Ok(outputs)
            }
        }
    }

    /// Discard the speculative state of the front slot, if there is any.
    fn roll_back<S: Stack>(&mut self, stack: &mut S) -> Option<PipelineOutput> {
        if !self.speculative {
            return None;
        }
        self.speculative = false;
        match stack.rollback() {
            Ok(()) => None,
            Err(err) => Some(PipelineOutput::StackFailed(err)),
        }
    }

    fn mark_resolved(&mut self, seq: SeqNo) {
        if let Some(record) = self.records.get_mut(&seq) {
            record.resolved = true;
        }
    }

    fn discard(&self, mut slot: Slot) {
        slot.state = SlotState::Discarded;
        Event::DiscardSlot(DiscardSlotEvent {
            timestamp: SystemTime::now(),
            epoch: slot.epoch,
            seq: slot.seq,
            request: slot.request,
        })
        .publish(&self.event_publisher);
    }

    /// Process the primary's execute instruction.
    pub(crate) fn on_receive_execute<S: Stack>(
        &mut self,
        origin: ReplicaID,
        execute: Execute,
        stack: &mut S,
    ) -> Result<Vec<PipelineOutput>, StackError> {
        Event::ReceiveExecute(ReceiveExecuteEvent {
            timestamp: SystemTime::now(),
            origin,
            execute: execute.clone(),
        })
        .publish(&self.event_publisher);

        if execute.epoch < self.epoch || !self.in_window(execute.seq) {
            return Ok(Vec::new());
        }
        if execute.epoch > self.epoch {
            self.future_msgs
                .insert(execute.epoch, origin, PipelineMessage::Execute(execute));
            return Ok(Vec::new());
        }
        if origin != self.primary() {
            log::warn!("Ignoring Execute from {}, who is not the primary of epoch {}", origin, self.epoch);
            return Ok(Vec::new());
        }

        let seq = execute.seq;
        let record = self.records.entry(seq).or_insert_with(VerifyQuorumRecord::new);
        if record.execute.is_some() {
            return Ok(Vec::new());
        }
        record.execute = Some(execute);

        let front_is_waiting = self
            .slots
            .front()
            .is_some_and(|slot| slot.seq == seq && slot.state == SlotState::Ordered);
        if front_is_waiting {
            self.advance(stack)
        } else {
            self.evaluate(seq, stack)
        }
    }

    /// Process a replica's signed outcome report.
    pub(crate) fn on_receive_verify<S: Stack>(
        &mut self,
        origin: ReplicaID,
        verify: Verify,
        stack: &mut S,
    ) -> Result<Vec<PipelineOutput>, StackError> {
        Event::ReceiveVerify(ReceiveVerifyEvent {
            timestamp: SystemTime::now(),
            origin,
            verify: verify.clone(),
        })
        .publish(&self.event_publisher);

        if verify.epoch < self.epoch || !self.in_window(verify.seq) {
            return Ok(Vec::new());
        }
        if verify.epoch > self.epoch {
            self.future_msgs
                .insert(verify.epoch, origin, PipelineMessage::Verify(verify));
            return Ok(Vec::new());
        }
        if verify.replica != origin {
            log::warn!("Ignoring Verify from {} that claims to be from {}", origin, verify.replica);
            return Ok(Vec::new());
        }
        let correctly_signed = self
            .config
            .replicas
            .get(origin.index())
            .is_some_and(|verifying_key| verify.is_correct(verifying_key));
        if !correctly_signed {
            log::warn!("Ignoring incorrectly signed Verify from {}", origin);
            return Ok(Vec::new());
        }

        let seq = verify.seq;
        let inserted = self
            .records
            .entry(seq)
            .or_insert_with(VerifyQuorumRecord::new)
            .insert(verify);
        if !inserted {
            return Ok(Vec::new());
        }
        self.evaluate(seq, stack)
    }

    /// Commit the block described by an ordered decision.
    ///
    /// # Precondition
    ///
    /// The decision's request is not yet committed.
    pub(crate) fn on_decision<S: Stack>(
        &mut self,
        decision: Decision,
        stack: &mut S,
    ) -> Vec<PipelineOutput> {
        if !decision.is_correct(&self.config.replicas, self.config.commit_quorum) {
            log::warn!("Ignoring decision for seq {} with an invalid certificate", decision.seq);
            return Vec::new();
        }
        let height = match stack.blockchain_size() {
            Ok(height) => height,
            Err(err) => return self.commit_failed(&decision, err, stack),
        };
        if decision.height != height {
            log::warn!(
                "Ignoring decision for height {}, the blockchain has {} blocks",
                decision.height,
                height
            );
            return Vec::new();
        }

        let request = decision.request();
        let position = self.slots.iter().position(|slot| slot.request == request);
        let local_outcome = match position {
            Some(0) => self.slots.front().and_then(|slot| slot.local_outcome),
            _ => None,
        };
        let diverged = local_outcome.is_some_and(|outcome| outcome != decision.outcome);
        let rolled_back = if self.speculative && local_outcome != Some(decision.outcome) {
            stack.rollback()
        } else {
            Ok(())
        };
        if let Err(err) = rolled_back.and_then(|()| stack.commit_block(&decision.batch, &decision.outcome)) {
            return self.commit_failed(&decision, err, stack);
        }
        self.speculative = false;

        if let Some(position) = position {
            if let Some(mut slot) = self.slots.remove(position) {
                slot.state = SlotState::Committed;
                self.committed_through = self.committed_through.max(slot.seq);
            }
        }
        self.committed_through = self.committed_through.max(decision.seq);
        self.records = self.records.split_off(&(self.committed_through + 1));

        Event::CommitBlock(CommitBlockEvent {
            timestamp: SystemTime::now(),
            height,
            request,
            outcome: decision.outcome,
            rolled_back: diverged,
        })
        .publish(&self.event_publisher);

        let mut outputs = vec![PipelineOutput::Committed { request }];
        match self.advance(stack) {
            Ok(advanced) => outputs.extend(advanced),
            Err(err) => outputs.push(PipelineOutput::StackFailed(err)),
        }
        outputs
    }

    /// Give up on the slot of `decision` after the stack failed to commit it. The decision is still
    /// treated as applied, so that nothing at or below its seq is waited for again.
    fn commit_failed<S: Stack>(
        &mut self,
        decision: &Decision,
        error: StackError,
        stack: &mut S,
    ) -> Vec<PipelineOutput> {
        let request = decision.request();
        let mut outputs: Vec<PipelineOutput> = self.roll_back(stack).into_iter().collect();
        if let Some(position) = self.slots.iter().position(|slot| slot.request == request) {
            if let Some(slot) = self.slots.remove(position) {
                self.discard(slot);
            }
        }
        self.committed_through = self.committed_through.max(decision.seq);
        self.records = self.records.split_off(&(self.committed_through + 1));

        outputs.push(PipelineOutput::CommitFailed {
            epoch: self.epoch,
            seq: decision.seq,
            request,
            error,
        });
        outputs
    }

    /// Discard every slot and record of the current epoch, and enter `epoch`. Messages buffered for
    /// `epoch` are processed right away.
    ///
    /// The pipeline is in `epoch` when this returns, even if the stack failed along the way. Those
    /// failures are returned as [`PipelineOutput::StackFailed`].
    pub(crate) fn reset<S: Stack>(&mut self, epoch: Epoch, stack: &mut S) -> Vec<PipelineOutput> {
        self.epoch = epoch;
        let mut outputs: Vec<PipelineOutput> = self.roll_back(stack).into_iter().collect();
        let discarded: Vec<Slot> = self.slots.drain(..).collect();
        for slot in discarded {
            self.discard(slot);
        }
        self.records.clear();

        for (origin, msg) in self.future_msgs.take(epoch) {
            let replayed = match msg {
                PipelineMessage::Execute(execute) => self.on_receive_execute(origin, execute, stack),
                PipelineMessage::Verify(verify) => self.on_receive_verify(origin, verify, stack),
            };
            match replayed {
                Ok(replayed) => outputs.extend(replayed),
                Err(err) => outputs.push(PipelineOutput::StackFailed(err)),
            }
        }
        outputs
    }
}
