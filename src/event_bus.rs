/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus: a thread that receives [events](crate::events) from the algorithm thread and
//! invokes every handler registered for them, including the default loggers if logging is enabled.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) receive_request_handlers: Vec<HandlerPtr<ReceiveRequestEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) order_slot_handlers: Vec<HandlerPtr<OrderSlotEvent>>,
    pub(crate) execute_handlers: Vec<HandlerPtr<ExecuteEvent>>,
    pub(crate) receive_execute_handlers: Vec<HandlerPtr<ReceiveExecuteEvent>>,
    pub(crate) verify_handlers: Vec<HandlerPtr<VerifyEvent>>,
    pub(crate) receive_verify_handlers: Vec<HandlerPtr<ReceiveVerifyEvent>>,
    pub(crate) propose_decision_handlers: Vec<HandlerPtr<ProposeDecisionEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) discard_slot_handlers: Vec<HandlerPtr<DiscardSlotEvent>>,
    pub(crate) quorum_unreachable_handlers: Vec<HandlerPtr<QuorumUnreachableEvent>>,
    pub(crate) timeout_handlers: Vec<HandlerPtr<TimeoutEvent>>,
    pub(crate) start_epoch_change_handlers: Vec<HandlerPtr<StartEpochChangeEvent>>,
    pub(crate) start_epoch_handlers: Vec<HandlerPtr<StartEpochEvent>>,
}

/// Collect the user's handler (if any) and, if `log_events` is set, the default logger for `T`.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        receive_request_handler: Option<HandlerPtr<ReceiveRequestEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        order_slot_handler: Option<HandlerPtr<OrderSlotEvent>>,
        execute_handler: Option<HandlerPtr<ExecuteEvent>>,
        receive_execute_handler: Option<HandlerPtr<ReceiveExecuteEvent>>,
        verify_handler: Option<HandlerPtr<VerifyEvent>>,
        receive_verify_handler: Option<HandlerPtr<ReceiveVerifyEvent>>,
        propose_decision_handler: Option<HandlerPtr<ProposeDecisionEvent>>,
        commit_block_handler: Option<HandlerPtr<CommitBlockEvent>>,
        discard_slot_handler: Option<HandlerPtr<DiscardSlotEvent>>,
        quorum_unreachable_handler: Option<HandlerPtr<QuorumUnreachableEvent>>,
        timeout_handler: Option<HandlerPtr<TimeoutEvent>>,
        start_epoch_change_handler: Option<HandlerPtr<StartEpochChangeEvent>>,
        start_epoch_handler: Option<HandlerPtr<StartEpochEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            receive_request_handlers: handlers(log_events, receive_request_handler),
            propose_handlers: handlers(log_events, propose_handler),
            order_slot_handlers: handlers(log_events, order_slot_handler),
            execute_handlers: handlers(log_events, execute_handler),
            receive_execute_handlers: handlers(log_events, receive_execute_handler),
            verify_handlers: handlers(log_events, verify_handler),
            receive_verify_handlers: handlers(log_events, receive_verify_handler),
            propose_decision_handlers: handlers(log_events, propose_decision_handler),
            commit_block_handlers: handlers(log_events, commit_block_handler),
            discard_slot_handlers: handlers(log_events, discard_slot_handler),
            quorum_unreachable_handlers: handlers(log_events, quorum_unreachable_handler),
            timeout_handlers: handlers(log_events, timeout_handler),
            start_epoch_change_handlers: handlers(log_events, start_epoch_change_handler),
            start_epoch_handlers: handlers(log_events, start_epoch_handler),
        }
    }

    /// Event handlers that only log.
    pub(crate) fn logging() -> EventHandlers {
        EventHandlers::new(
            true, None, None, None, None, None, None, None, None, None, None, None, None, None, None,
        )
    }

    /// Whether no handler at all is registered, in which case no event bus needs to run.
    pub(crate) fn is_empty(&self) -> bool {
        self.receive_request_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.order_slot_handlers.is_empty()
            && self.execute_handlers.is_empty()
            && self.receive_execute_handlers.is_empty()
            && self.verify_handlers.is_empty()
            && self.receive_verify_handlers.is_empty()
            && self.propose_decision_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.discard_slot_handlers.is_empty()
            && self.quorum_unreachable_handlers.is_empty()
            && self.timeout_handlers.is_empty()
            && self.start_epoch_change_handlers.is_empty()
            && self.start_epoch_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ReceiveRequest(receive_request_event) =>
                self.receive_request_handlers.iter().for_each(|handler| handler(&receive_request_event)),

            Event::Propose(propose_event) =>
                self.propose_handlers.iter().for_each(|handler| handler(&propose_event)),

            Event::OrderSlot(order_slot_event) =>
                self.order_slot_handlers.iter().for_each(|handler| handler(&order_slot_event)),

            Event::Execute(execute_event) =>
                self.execute_handlers.iter().for_each(|handler| handler(&execute_event)),

            Event::ReceiveExecute(receive_execute_event) =>
                self.receive_execute_handlers.iter().for_each(|handler| handler(&receive_execute_event)),

            Event::Verify(verify_event) =>
                self.verify_handlers.iter().for_each(|handler| handler(&verify_event)),

            Event::ReceiveVerify(receive_verify_event) =>
                self.receive_verify_handlers.iter().for_each(|handler| handler(&receive_verify_event)),

            Event::ProposeDecision(propose_decision_event) =>
                self.propose_decision_handlers.iter().for_each(|handler| handler(&propose_decision_event)),

            Event::CommitBlock(commit_block_event) =>
                self.commit_block_handlers.iter().for_each(|handler| handler(&commit_block_event)),

            Event::DiscardSlot(discard_slot_event) =>
                self.discard_slot_handlers.iter().for_each(|handler| handler(&discard_slot_event)),

            Event::QuorumUnreachable(quorum_unreachable_event) =>
                self.quorum_unreachable_handlers.iter().for_each(|handler| handler(&quorum_unreachable_event)),

            Event::Timeout(timeout_event) =>
                self.timeout_handlers.iter().for_each(|handler| handler(&timeout_event)),

            Event::StartEpochChange(start_epoch_change_event) =>
                self.start_epoch_change_handlers.iter().for_each(|handler| handler(&start_epoch_change_event)),

            Event::StartEpoch(start_epoch_event) =>
                self.start_epoch_handlers.iter().for_each(|handler| handler(&start_epoch_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The algorithm thread exits first on shutdown.
            Err(TryRecvError::Disconnected) => return,
        }
    })
}
