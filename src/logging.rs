/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via replica's
//! [config](crate::replica::Configuration).
//!
//! Sieve logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitBlock](crate::events::CommitBlockEvent) is printed:
//!
//! ```text
//! CommitBlock, 1701329264, 3, fNGCJyk, Id5u7f6, false
//! ```
//!
//! In the snippet:
//! - The third value is the height of the committed block.
//! - The fourth value is the first seven characters of the Base64 encoding of the request digest.
//! - The fifth value is the first seven characters of the Base64 encoding of the committed outcome.
//! - The sixth value is whether the replica had to roll back its own outcome.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const RECEIVE_REQUEST: &str = "ReceiveRequest";
pub const PROPOSE: &str = "Propose";
pub const ORDER_SLOT: &str = "OrderSlot";

pub const EXECUTE: &str = "Execute";
pub const RECEIVE_EXECUTE: &str = "ReceiveExecute";
pub const VERIFY: &str = "Verify";
pub const RECEIVE_VERIFY: &str = "ReceiveVerify";
pub const PROPOSE_DECISION: &str = "ProposeDecision";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const DISCARD_SLOT: &str = "DiscardSlot";
pub const QUORUM_UNREACHABLE: &str = "QuorumUnreachable";

pub const TIMEOUT: &str = "Timeout";
pub const START_EPOCH_CHANGE: &str = "StartEpochChange";
pub const START_EPOCH: &str = "StartEpoch";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ReceiveRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_request_event: &ReceiveRequestEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_REQUEST,
                secs_since_unix_epoch(receive_request_event.timestamp),
                receive_request_event.origin,
                first_seven_base64_chars(&receive_request_event.request.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.epoch,
                propose_event.seq,
                first_seven_base64_chars(&propose_event.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for OrderSlotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |order_slot_event: &OrderSlotEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ORDER_SLOT,
                secs_since_unix_epoch(order_slot_event.timestamp),
                order_slot_event.epoch,
                order_slot_event.seq,
                first_seven_base64_chars(&order_slot_event.request.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ExecuteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |execute_event: &ExecuteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                EXECUTE,
                secs_since_unix_epoch(execute_event.timestamp),
                execute_event.execute.epoch,
                execute_event.execute.seq,
                execute_event.execute.height,
                first_seven_base64_chars(&execute_event.execute.outcome.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveExecuteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_execute_event: &ReceiveExecuteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_EXECUTE,
                secs_since_unix_epoch(receive_execute_event.timestamp),
                receive_execute_event.origin,
                receive_execute_event.execute.epoch,
                receive_execute_event.execute.seq,
                first_seven_base64_chars(&receive_execute_event.execute.outcome.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for VerifyEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |verify_event: &VerifyEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VERIFY,
                secs_since_unix_epoch(verify_event.timestamp),
                verify_event.verify.epoch,
                verify_event.verify.seq,
                first_seven_base64_chars(&verify_event.verify.outcome.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVerifyEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_verify_event: &ReceiveVerifyEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_VERIFY,
                secs_since_unix_epoch(receive_verify_event.timestamp),
                receive_verify_event.origin,
                receive_verify_event.verify.epoch,
                receive_verify_event.verify.seq,
                first_seven_base64_chars(&receive_verify_event.verify.outcome.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeDecisionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_decision_event: &ProposeDecisionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE_DECISION,
                secs_since_unix_epoch(propose_decision_event.timestamp),
                propose_decision_event.epoch,
                propose_decision_event.seq,
                first_seven_base64_chars(&propose_decision_event.outcome.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.height,
                first_seven_base64_chars(&commit_block_event.request.bytes()),
                first_seven_base64_chars(&commit_block_event.outcome.bytes()),
                commit_block_event.rolled_back
            )
        };
        Box::new(logger)
    }
}

impl Logger for DiscardSlotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |discard_slot_event: &DiscardSlotEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                DISCARD_SLOT,
                secs_since_unix_epoch(discard_slot_event.timestamp),
                discard_slot_event.epoch,
                discard_slot_event.seq,
                first_seven_base64_chars(&discard_slot_event.request.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for QuorumUnreachableEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |quorum_unreachable_event: &QuorumUnreachableEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                QUORUM_UNREACHABLE,
                secs_since_unix_epoch(quorum_unreachable_event.timestamp),
                quorum_unreachable_event.epoch,
                quorum_unreachable_event.seq,
                quorum_unreachable_event.mismatches
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_event: &TimeoutEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                TIMEOUT,
                secs_since_unix_epoch(timeout_event.timestamp),
                timeout_event.epoch,
                timeout_event.timer
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartEpochChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_epoch_change_event: &StartEpochChangeEvent| {
            log::info!(
                "{}, {}, {}",
                START_EPOCH_CHANGE,
                secs_since_unix_epoch(start_epoch_change_event.timestamp),
                start_epoch_change_event.new_epoch
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartEpochEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_epoch_event: &StartEpochEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_EPOCH,
                secs_since_unix_epoch(start_epoch_event.timestamp),
                start_epoch_event.epoch,
                start_epoch_event.primary
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
