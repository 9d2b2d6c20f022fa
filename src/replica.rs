/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! Sieve works to safely replicate a possibly non-deterministic stack in multiple processes. In our
//! terminology, these processes are called 'replicas', and therefore the set of all replicas is
//! called the 'replica set'. Each replica is identified by its position in
//! [`Configuration::replicas`], which holds the [Ed25519 public key](ed25519_dalek::VerifyingKey) of
//! every replica.
//!
//! The key components of this module are:
//! - [`SieveReplica`], a passive replica that processes one input at a time. It is what the
//!   deterministic simulation harness in the tests drives, and what [`ReplicaSpec::start`] runs.
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Processing
//!
//! A replica never processes two inputs at once. Each input (a client batch, an envelope from the
//! network, or a timer tick) is handed to the component that owns it, and whatever that component
//! produces is processed, in order, before the next input:
//! - Requests delivered by the ordering core become slots in the execute/verify pipeline.
//! - Decisions delivered by the ordering core commit blocks.
//! - Decisions proposed by the pipeline are handed back to the ordering core.
//! - A slot whose quorum is unreachable, or an expired timer, starts an epoch change.
//! - So does a block that the stack failed to commit. Stack failures never stop the processing of
//!   the input: they are logged, and the first one is returned once the input is fully processed.
//! - Entering a new epoch resets the pipeline and the ordering core.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .network(network)
//!     .stack(stack)
//!     .configuration(configuration)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! The replica's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .replicas(verifying_keys)
//!     .request_timeout(Duration::from_millis(200))
//!     .new_view_timeout(Duration::from_millis(400))
//!     .last_new_view_timeout(Duration::from_millis(400))
//!     .log_events(true)
//!     .build()
//! ```

use std::collections::{HashSet, VecDeque};
use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use ed25519_dalek::{SigningKey, VerifyingKey};
use typed_builder::TypedBuilder;

use crate::epoch::implementation::{EpochConfiguration, EpochController, EpochDecision, NewEpochPlan};
use crate::epoch::messages::EpochMessage;
use crate::event_bus::*;
use crate::events::*;
use crate::networking::{
    messages::{MalformedMessageError, Message},
    network::Network,
    sending::SenderHandle,
};
use crate::ordering::adapter::{OrderingAdapter, OrderingConfiguration};
use crate::ordering::messages::Payload;
use crate::ordering::pbft::Delivery;
use crate::pipeline::implementation::{Pipeline, PipelineConfiguration, PipelineOutput};
use crate::pipeline::types::SlotState;
use crate::stack::{Stack, StackError};
use crate::types::{
    block::Batch,
    crypto_primitives::Keypair,
    data_types::{BlockHeight, Epoch, ReplicaID, ReplicaSetSize, SeqNo},
};

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](ed25519_dalek::SigningKey).
/// 2. The public keys of every replica in the replica set, including this one. The position of a key
///    in this list is the [`ReplicaID`] of its owner.
/// 3. The request timeout, after which a replica that has seen a request but not committed anything
///    asks for a new epoch.
/// 4. The new view timeout, after which a replica that asked for a new epoch but did not enter one
///    asks for the next. It doubles every time it expires.
/// 5. The last new view timeout, which replaces the request timeout right after an epoch starts.
/// 6. The primary seed, which shifts the rotation of primaries: the primary of epoch `e` is replica
///    `(e + primary_seed) mod N`.
/// 7. The commit quorum, the number of agreeing verify reports needed to commit an outcome.
/// 8. The message buffer capacity, which bounds how many messages for future epochs are kept, and how
///    far past the last delivered (or committed) sequence number ordering and verify messages are
///    accepted.
/// 9. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Commit quorum
///
/// The commit quorum defaults to the same quorum used for ordering, which is `2f + 1` in a replica set
/// of `3f + 1`. It can be lowered to as little as `f + 1`, which guarantees that at least one correct
/// replica vouches for every committed outcome, at the cost of more slots being discarded when
/// execution is not deterministic.
///
/// ## Log Events
///
/// Sieve logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder, Clone)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.replicas(...)`
    - `.request_timeout(...)`
    - `.new_view_timeout(...)`
    - `.last_new_view_timeout(...)`
    - `.log_events(...)`

    Optional:
    - `.primary_seed(...)`
    - `.commit_quorum(...)`
    - `.msg_buffer_capacity(...)`
"
))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign messages. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the public keys of all replicas, indexed by replica ID. Required."))]
    pub replicas: Vec<VerifyingKey>,
    #[builder(setter(doc = "Set how long a request may stay outstanding before the replica asks for a new epoch. Required."))]
    pub request_timeout: Duration,
    #[builder(setter(doc = "Set how long the replica waits for a new epoch to start before asking for the next. Required."))]
    pub new_view_timeout: Duration,
    #[builder(setter(doc = "Set the request timeout that applies right after a new epoch starts. Required."))]
    pub last_new_view_timeout: Duration,
    #[builder(default = 0, setter(doc = "Set the offset of the primary rotation. Optional, defaults to 0."))]
    pub primary_seed: u64,
    #[builder(default, setter(strip_option, doc = "Set the number of agreeing verify reports needed to commit an outcome. Optional, defaults to the ordering quorum."))]
    pub commit_quorum: Option<usize>,
    #[builder(default = 1024, setter(doc = "Set the maximum number of future-epoch messages that each component buffers, which is also the width of the sequence number window. Optional, defaults to 1024."))]
    pub msg_buffer_capacity: usize,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// The checked form of a [`Configuration`].
struct ValidConfiguration {
    me: ReplicaID,
    keypair: Keypair,
    size: ReplicaSetSize,
    commit_quorum: usize,
    configuration: Configuration,
}

impl Configuration {
    fn validate(self) -> Result<ValidConfiguration, ConfigurationError> {
        if self.replicas.is_empty() {
            return Err(ConfigurationError::EmptyReplicaSet);
        }

        let mut seen = HashSet::new();
        for (index, replica) in self.replicas.iter().enumerate() {
            if !seen.insert(replica.to_bytes()) {
                return Err(ConfigurationError::DuplicateReplica(ReplicaID::new(index as u32)));
            }
        }

        let keypair = Keypair::new(self.me.clone());
        let me = match self.replicas.iter().position(|replica| *replica == keypair.public()) {
            Some(index) => ReplicaID::new(index as u32),
            None => return Err(ConfigurationError::NotAReplica),
        };

        for (name, timeout) in [
            ("request_timeout", self.request_timeout),
            ("new_view_timeout", self.new_view_timeout),
            ("last_new_view_timeout", self.last_new_view_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigurationError::ZeroTimeout(name));
            }
        }

        let size = ReplicaSetSize::new(self.replicas.len());
        let commit_quorum = self.commit_quorum.unwrap_or(size.quorum());
        if commit_quorum <= size.f() || commit_quorum > size.n() {
            return Err(ConfigurationError::InvalidCommitQuorum {
                commit_quorum,
                n: size.n(),
            });
        }

        Ok(ValidConfiguration {
            me,
            keypair,
            size,
            commit_quorum,
            configuration: self,
        })
    }
}

/// A [`Configuration`] that a replica cannot be started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    EmptyReplicaSet,
    /// `me` is not among `replicas`.
    NotAReplica,
    /// The replica at this position has the same key as an earlier one.
    DuplicateReplica(ReplicaID),
    ZeroTimeout(&'static str),
    /// The commit quorum must be greater than `f` and at most `n`.
    InvalidCommitQuorum { commit_quorum: usize, n: usize },
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::EmptyReplicaSet => write!(f, "the replica set is empty"),
            ConfigurationError::NotAReplica => write!(f, "this replica's key is not in the replica set"),
            ConfigurationError::DuplicateReplica(replica) => {
                write!(f, "replica {} has the same key as another replica", replica)
            }
            ConfigurationError::ZeroTimeout(name) => write!(f, "{} must not be zero", name),
            ConfigurationError::InvalidCommitQuorum { commit_quorum, n } => write!(
                f,
                "commit quorum {} is not valid for a replica set of {}",
                commit_quorum, n
            ),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// An error that occurred while a replica processed one of its inputs. The replica stays usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SieveError {
    Malformed(MalformedMessageError),
    Stack(StackError),
}

impl Display for SieveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SieveError::Malformed(err) => Display::fmt(err, f),
            SieveError::Stack(err) => write!(f, "stack error: {}", err),
        }
    }
}

impl std::error::Error for SieveError {}

impl From<MalformedMessageError> for SieveError {
    fn from(value: MalformedMessageError) -> Self {
        SieveError::Malformed(value)
    }
}

impl From<StackError> for SieveError {
    fn from(value: StackError) -> Self {
        SieveError::Stack(value)
    }
}

/// A unit of work produced while processing an input.
enum Step {
    Deliver(Delivery),
    Pipeline(PipelineOutput),
    Epoch(EpochDecision),
}

/// A passive Sieve replica. It does nothing until one of [`submit`](Self::submit),
/// [`on_receive`](Self::on_receive) or [`tick`](Self::tick) is called.
///
/// If [`log_events`](Configuration::log_events) is set and no event publisher is given, events are
/// logged on the calling thread before each of those calls returns.
pub struct SieveReplica<N: Network, S: Stack> {
    me: ReplicaID,
    size: ReplicaSetSize,
    stack: S,
    adapter: OrderingAdapter<N>,
    pipeline: Pipeline<N>,
    epochs: EpochController<N>,
    event_publisher: Option<Sender<Event>>,
    event_logger: Option<(Receiver<Event>, EventHandlers)>,
}

impl<N: Network, S: Stack> SieveReplica<N, S> {
    pub fn new(configuration: Configuration, network: N, stack: S) -> Result<Self, ConfigurationError> {
        Self::build(configuration, network, stack, None)
    }

    /// Like [`new`](Self::new), but every [event](crate::events) the replica emits is also sent on
    /// `event_publisher`.
    pub fn with_event_publisher(
        configuration: Configuration,
        network: N,
        stack: S,
        event_publisher: Sender<Event>,
    ) -> Result<Self, ConfigurationError> {
        Self::build(configuration, network, stack, Some(event_publisher))
    }

    fn build(
        configuration: Configuration,
        network: N,
        stack: S,
        mut event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, ConfigurationError> {
        let ValidConfiguration {
            me,
            keypair,
            size,
            commit_quorum,
            configuration,
        } = configuration.validate()?;

        let mut event_logger = None;
        if event_publisher.is_none() && configuration.log_events {
            let (publisher, subscriber) = mpsc::channel();
            event_publisher = Some(publisher);
            event_logger = Some((subscriber, EventHandlers::logging()));
        }

        let ordering_config = OrderingConfiguration {
            me,
            size,
            primary_seed: configuration.primary_seed,
            request_timeout: configuration.request_timeout,
            new_view_timeout: configuration.new_view_timeout,
            last_new_view_timeout: configuration.last_new_view_timeout,
            msg_buffer_capacity: configuration.msg_buffer_capacity,
        };
        let pipeline_config = PipelineConfiguration {
            me,
            keypair: keypair.clone(),
            replicas: configuration.replicas.clone(),
            size,
            primary_seed: configuration.primary_seed,
            commit_quorum,
            msg_buffer_capacity: configuration.msg_buffer_capacity,
        };
        let epoch_config = EpochConfiguration {
            me,
            keypair,
            replicas: configuration.replicas,
            size,
            primary_seed: configuration.primary_seed,
        };

        Ok(Self {
            me,
            size,
            stack,
            adapter: OrderingAdapter::new(
                ordering_config,
                SenderHandle::new(network.clone()),
                event_publisher.clone(),
            ),
            pipeline: Pipeline::new(
                pipeline_config,
                SenderHandle::new(network.clone()),
                event_publisher.clone(),
            ),
            epochs: EpochController::new(
                epoch_config,
                SenderHandle::new(network),
                event_publisher.clone(),
            ),
            event_publisher,
            event_logger,
        })
    }

    /// Submit a client batch. Batches that this replica already committed are ignored.
    pub fn submit(&mut self, batch: Batch) -> Result<(), SieveError> {
        let steps = self.adapter.submit(batch).into_iter().map(Step::Deliver).collect();
        let result = self.process(steps);
        self.log_events();
        Ok(result?)
    }

    /// Process an envelope that `origin` sent.
    ///
    /// Envelopes that this replica sent itself are ignored, since it applies its own messages when it
    /// sends them. Envelopes that do not decode return [`SieveError::Malformed`] and change nothing.
    pub fn on_receive(&mut self, origin: ReplicaID, bytes: &[u8]) -> Result<(), SieveError> {
        if origin == self.me {
            return Ok(());
        }
        let msg = Message::decode(bytes)?;
        if origin.index() >= self.size.n() {
            log::warn!("Ignoring message from {}, who is not in the replica set", origin);
            return Ok(());
        }

        let result = self.on_receive_msg(origin, msg);
        self.log_events();
        result
    }

    fn on_receive_msg(&mut self, origin: ReplicaID, msg: Message) -> Result<(), SieveError> {
        let steps: VecDeque<Step> = match msg {
            Message::Ordering(msg) => self
                .adapter
                .on_receive_msg(origin, msg)
                .into_iter()
                .map(Step::Deliver)
                .collect(),
            Message::Execute(execute) => self
                .pipeline
                .on_receive_execute(origin, execute, &mut self.stack)?
                .into_iter()
                .map(Step::Pipeline)
                .collect(),
            Message::Verify(verify) => self
                .pipeline
                .on_receive_verify(origin, verify, &mut self.stack)?
                .into_iter()
                .map(Step::Pipeline)
                .collect(),
            Message::Epoch(EpochMessage::EpochChange(epoch_change)) => {
                VecDeque::from([Step::Epoch(self.epochs.on_receive_epoch_change(origin, epoch_change))])
            }
            Message::Epoch(EpochMessage::NewEpoch(new_epoch)) => {
                VecDeque::from([Step::Epoch(self.epochs.on_receive_new_epoch(origin, new_epoch))])
            }
        };
        self.process(steps)?;
        Ok(())
    }

    /// Check the replica's timers against the current time.
    pub fn tick(&mut self) -> Result<(), SieveError> {
        self.tick_at(Instant::now())
    }

    /// Check the replica's timers against `now`. An expired timer starts (or escalates) an epoch
    /// change.
    pub fn tick_at(&mut self, now: Instant) -> Result<(), SieveError> {
        let timer = match self.adapter.tick(now) {
            Some(timer) => timer,
            None => return Ok(()),
        };
        let result = self.on_timeout(timer);
        self.log_events();
        result
    }

    fn on_timeout(&mut self, timer: TimerKind) -> Result<(), SieveError> {
        Event::Timeout(TimeoutEvent {
            timestamp: SystemTime::now(),
            epoch: self.epochs.epoch(),
            timer,
        })
        .publish(&self.event_publisher);

        let decision = self.start_epoch_change(self.epochs.next_target());
        self.process(VecDeque::from([Step::Epoch(decision)]))?;
        Ok(())
    }

    pub fn id(&self) -> ReplicaID {
        self.me
    }

    pub fn epoch(&self) -> Epoch {
        self.epochs.epoch()
    }

    pub fn primary(&self) -> ReplicaID {
        self.adapter.primary()
    }

    pub fn blockchain_size(&self) -> Result<BlockHeight, SieveError> {
        Ok(self.stack.blockchain_size()?)
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Get the sequence number and state of every ordered slot that is not yet committed, in the
    /// order they will execute.
    pub fn pending_slots(&self) -> Vec<(SeqNo, SlotState)> {
        self.pipeline.slot_states()
    }

    /// Get the epoch this replica has asked to move to, if it is waiting for a new epoch to start.
    pub fn requested_epoch(&self) -> Option<Epoch> {
        self.epochs.changing_to()
    }

    /// Get the number of sequence numbers that this replica keeps ordering or verify state for.
    pub fn tracked_seqs(&self) -> usize {
        self.adapter.log_len() + self.pipeline.records_len()
    }

    /// Whether the replica has nothing left to do: no outstanding request, no slot in the pipeline,
    /// and no epoch change in progress.
    pub fn is_idle(&self) -> bool {
        !self.adapter.has_outstanding() && self.pipeline.is_idle() && !self.epochs.in_epoch_change()
    }

    fn log_events(&self) {
        if let Some((event_subscriber, event_handlers)) = &self.event_logger {
            while let Ok(event) = event_subscriber.try_recv() {
                event_handlers.fire_handlers(event);
            }
        }
    }

    fn start_epoch_change(&mut self, new_epoch: Epoch) -> EpochDecision {
        if !self.epochs.is_behind(new_epoch) {
            return EpochDecision::Nothing;
        }
        self.adapter.on_epoch_change_started();
        self.epochs.start_epoch_change(
            new_epoch,
            self.adapter.last_delivered(),
            self.adapter.prepared_entries(),
        )
    }

    /// Process `steps`, and everything they produce, in order.
    ///
    /// A stack failure in one step does not stop the steps after it. The first failure is returned
    /// once every step has been processed.
    fn process(&mut self, mut steps: VecDeque<Step>) -> Result<(), StackError> {
        let mut first_failure = None;
        while let Some(step) = steps.pop_front() {
            match step {
                Step::Deliver(delivery) => match self.on_delivery(delivery) {
                    Ok(outputs) => steps.extend(outputs.into_iter().map(Step::Pipeline)),
                    Err(err) => {
                        log::error!("Stack failure while processing an ordered entry: {}", err);
                        first_failure.get_or_insert(err);
                    }
                },

                Step::Pipeline(PipelineOutput::ProposeDecision(decision)) => steps.extend(
                    self.adapter
                        .propose_decision(decision)
                        .into_iter()
                        .map(Step::Deliver),
                ),

                Step::Pipeline(PipelineOutput::Committed { request }) => {
                    self.adapter.mark_committed(request)
                }

                Step::Pipeline(PipelineOutput::QuorumUnreachable { epoch, seq, request }) => {
                    log::warn!(
                        "Slot {} in epoch {} cannot reach a commit quorum, asking for a new epoch",
                        seq,
                        epoch
                    );
                    self.adapter.drop_request(&request);
                    let decision = self.start_epoch_change(epoch + 1);
                    steps.push_back(Step::Epoch(decision));
                }

                // The request was committed by the replica set, only this replica's ledger is missing
                // the block.
                Step::Pipeline(PipelineOutput::CommitFailed {
                    epoch,
                    seq,
                    request,
                    error,
                }) => {
                    log::error!(
                        "Committing slot {} in epoch {} failed: {}, asking for a new epoch",
                        seq,
                        epoch,
                        error
                    );
                    self.adapter.mark_committed(request);
                    first_failure.get_or_insert(error);
                    let decision = self.start_epoch_change(epoch + 1);
                    steps.push_back(Step::Epoch(decision));
                }

                Step::Pipeline(PipelineOutput::StackFailed(err)) => {
                    log::error!("Stack failure in the pipeline: {}", err);
                    first_failure.get_or_insert(err);
                }

                Step::Epoch(EpochDecision::Nothing) => (),

                Step::Epoch(EpochDecision::Join(epoch)) => {
                    let decision = self.start_epoch_change(epoch);
                    steps.push_back(Step::Epoch(decision));
                }

                Step::Epoch(EpochDecision::Install(plan)) => steps.extend(self.install(plan)),
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn on_delivery(&mut self, delivery: Delivery) -> Result<Vec<PipelineOutput>, StackError> {
        match delivery.payload {
            None => Ok(Vec::new()),

            // Requests re-issued by an epoch change are proposed afresh by the new primary.
            Some(Payload::Request(_)) if delivery.reissued => Ok(Vec::new()),

            Some(Payload::Request(batch)) => {
                if self.adapter.is_committed(&batch.digest()) {
                    return Ok(Vec::new());
                }
                self.pipeline
                    .on_ordered(delivery.epoch, delivery.seq, batch, &mut self.stack)
            }

            Some(Payload::Decision(decision)) => {
                if self.adapter.is_committed(&decision.request()) {
                    log::debug!("Skipping decision for seq {}, its request is already committed", decision.seq);
                    return Ok(Vec::new());
                }
                Ok(self.pipeline.on_decision(decision, &mut self.stack))
            }
        }
    }

    /// Enter the epoch of `plan`. Every component is in the new epoch once this returns, whatever
    /// the stack does while the pipeline is reset.
    fn install(&mut self, plan: NewEpochPlan) -> Vec<Step> {
        let NewEpochPlan { epoch, reissued } = plan;
        self.epochs.installed(epoch);
        let outputs = self.pipeline.reset(epoch, &mut self.stack);
        let deliveries = self.adapter.install(epoch, reissued);

        deliveries
            .into_iter()
            .map(Step::Deliver)
            .chain(outputs.into_iter().map(Step::Pipeline))
            .collect()
    }
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.network(...)`
    - `.stack(...)`
    - `.configuration(...)`

    Optional:
    - `.on_receive_request(...)`
    - `.on_propose(...)`
    - `.on_order_slot(...)`
    - `.on_execute(...)`
    - `.on_receive_execute(...)`
    - `.on_verify(...)`
    - `.on_receive_verify(...)`
    - `.on_propose_decision(...)`
    - `.on_commit_block(...)`
    - `.on_discard_slot(...)`
    - `.on_quorum_unreachable(...)`
    - `.on_timeout(...)`
    - `.on_start_epoch_change(...)`
    - `.on_start_epoch(...)`
"
))]
pub struct ReplicaSpec<N: Network + 'static, S: Stack> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the execution and ledger stack. The argument must implement the [Stack](crate::stack::Stack) trait. Required."))]
    stack: S,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveRequestEvent>),
    doc = "Register a handler closure to be invoked after the replica starts tracking a client request. Optional."))]
    on_receive_request: Option<HandlerPtr<ReceiveRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica, as primary, assigns a sequence number. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&OrderSlotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<OrderSlotEvent>),
    doc = "Register a handler closure to be invoked after an ordered request enters the pipeline. Optional."))]
    on_order_slot: Option<HandlerPtr<OrderSlotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ExecuteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ExecuteEvent>),
    doc = "Register a handler closure to be invoked after the replica, as primary, broadcasts an execute instruction. Optional."))]
    on_execute: Option<HandlerPtr<ExecuteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveExecuteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveExecuteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives an execute instruction. Optional."))]
    on_receive_execute: Option<HandlerPtr<ReceiveExecuteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VerifyEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VerifyEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts its verify report. Optional."))]
    on_verify: Option<HandlerPtr<VerifyEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVerifyEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVerifyEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a verify report. Optional."))]
    on_receive_verify: Option<HandlerPtr<ReceiveVerifyEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeDecisionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeDecisionEvent>),
    doc = "Register a handler closure to be invoked after the replica, as primary, proposes a decision. Optional."))]
    on_propose_decision: Option<HandlerPtr<ProposeDecisionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DiscardSlotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DiscardSlotEvent>),
    doc = "Register a handler closure to be invoked after a slot is discarded. Optional."))]
    on_discard_slot: Option<HandlerPtr<DiscardSlotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&QuorumUnreachableEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<QuorumUnreachableEvent>),
    doc = "Register a handler closure to be invoked after the replica finds that a slot cannot reach a commit quorum. Optional."))]
    on_quorum_unreachable: Option<HandlerPtr<QuorumUnreachableEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutEvent>),
    doc = "Register a handler closure to be invoked after one of the replica's timers expires. Optional."))]
    on_timeout: Option<HandlerPtr<TimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartEpochChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartEpochChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica asks for a new epoch. Optional."))]
    on_start_epoch_change: Option<HandlerPtr<StartEpochChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartEpochEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartEpochEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new epoch. Optional."))]
    on_start_epoch: Option<HandlerPtr<StartEpochEvent>>,
}

impl<N: Network + 'static, S: Stack> ReplicaSpec<N, S> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    pub fn start(self) -> Result<Replica, ConfigurationError> {
        let log_events = self.configuration.log_events;
        let event_handlers = EventHandlers::new(
            log_events,
            self.on_receive_request,
            self.on_propose,
            self.on_order_slot,
            self.on_execute,
            self.on_receive_execute,
            self.on_verify,
            self.on_receive_verify,
            self.on_propose_decision,
            self.on_commit_block,
            self.on_discard_slot,
            self.on_quorum_unreachable,
            self.on_timeout,
            self.on_start_epoch_change,
            self.on_start_epoch,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let replica = SieveReplica::build(
            self.configuration,
            self.network.clone(),
            self.stack,
            event_publisher,
        )?;

        let (submitter, submissions) = mpsc::channel();
        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let algorithm = start_algorithm(
            replica,
            self.network,
            submissions,
            algorithm_shutdown_receiver,
        );

        let (event_bus, event_bus_shutdown) = match (event_subscriber, event_handlers.is_empty()) {
            (Some(event_subscriber), false) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                (
                    Some(start_event_bus(
                        event_handlers,
                        event_subscriber,
                        event_bus_shutdown_receiver,
                    )),
                    Some(event_bus_shutdown),
                )
            }
            _ => (None, None),
        };

        Ok(Replica {
            submitter,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// Run `replica` on its own thread: feed it client batches from `submissions` and envelopes from
/// `network`, and check its timers in between.
fn start_algorithm<N: Network + 'static, S: Stack>(
    mut replica: SieveReplica<N, S>,
    mut network: N,
    submissions: Receiver<Batch>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Algorithm thread disconnected from main thread")
            }
        }

        while let Ok(batch) = submissions.try_recv() {
            if let Err(err) = replica.submit(batch) {
                log::error!("Failed to submit batch: {}", err);
            }
        }

        match network.recv() {
            Some((origin, bytes)) => {
                if let Err(err) = replica.on_receive(origin, &bytes) {
                    log::warn!("Failed to process message from {}: {}", origin, err);
                }
            }
            None => thread::yield_now(),
        }

        if let Err(err) = replica.tick() {
            log::error!("Failed to process timeout: {}", err);
        }
    })
}

/// A handle to the background threads of a Sieve replica. When this value is dropped, all
/// background threads are gracefully shut down.
pub struct Replica {
    submitter: Sender<Batch>,
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Submit a client batch to the replica.
    pub fn submit(&self, batch: Batch) {
        // The algorithm thread lives as long as this handle.
        let _ = self.submitter.send(batch);
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // Safety: the algorithm thread publishes events to the event bus, so it is shut down first.
        let _ = self.algorithm_shutdown.send(());
        if let Some(algorithm) = self.algorithm.take() {
            let _ = algorithm.join();
        }

        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}
