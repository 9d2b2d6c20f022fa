/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The message envelope: an exhaustive enumeration around every message variant used in Sieve.
//!
//! On the wire, a message is the Borsh serialization of [`Message`]. Bytes that do not decode into
//! a `Message` are reported as a [`MalformedMessageError`] and dropped by the receiving replica.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    epoch::messages::{EpochChange, EpochMessage, NewEpoch},
    ordering::messages::OrderingMessage,
    pipeline::messages::{Execute, Verify},
    types::data_types::{Epoch, SeqNo},
};

/// All message variants used in Sieve.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`OrderingMessage`]. Handled by the ordering adapter.
    Ordering(OrderingMessage),

    /// See: [`Execute`]. Handled by the execute/verify pipeline.
    Execute(Execute),

    /// See: [`Verify`]. Handled by the execute/verify pipeline.
    Verify(Verify),

    /// See: [`EpochMessage`]. Handled by the epoch controller.
    Epoch(EpochMessage),
}

impl Message {
    /// Serialize this message into its wire format.
    pub fn encode(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    /// Deserialize a message from its wire format. Trailing bytes make the message malformed.
    pub fn decode(bytes: &[u8]) -> Result<Message, MalformedMessageError> {
        Message::try_from_slice(bytes).map_err(|err| MalformedMessageError {
            len: bytes.len(),
            reason: err.to_string(),
        })
    }

    /// Get the epoch that the message was generated under, if it is scoped to an epoch. For epoch
    /// change messages this is the epoch being asked for or started.
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            Message::Ordering(msg) => msg.epoch(),
            Message::Execute(Execute { epoch, .. }) => Some(*epoch),
            Message::Verify(Verify { epoch, .. }) => Some(*epoch),
            Message::Epoch(msg) => Some(msg.epoch()),
        }
    }

    /// Get the sequence number that the message is about, if any.
    pub fn seq(&self) -> Option<SeqNo> {
        match self {
            Message::Ordering(msg) => msg.seq(),
            Message::Execute(Execute { seq, .. }) => Some(*seq),
            Message::Verify(Verify { seq, .. }) => Some(*seq),
            Message::Epoch(_) => None,
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, Message::Ordering(_))
    }
}

impl From<OrderingMessage> for Message {
    fn from(value: OrderingMessage) -> Self {
        Message::Ordering(value)
    }
}

impl From<Execute> for Message {
    fn from(value: Execute) -> Self {
        Message::Execute(value)
    }
}

impl From<Verify> for Message {
    fn from(value: Verify) -> Self {
        Message::Verify(value)
    }
}

impl From<EpochMessage> for Message {
    fn from(value: EpochMessage) -> Self {
        Message::Epoch(value)
    }
}

impl From<EpochChange> for Message {
    fn from(value: EpochChange) -> Self {
        Message::Epoch(EpochMessage::EpochChange(value))
    }
}

impl From<NewEpoch> for Message {
    fn from(value: NewEpoch) -> Self {
        Message::Epoch(EpochMessage::NewEpoch(value))
    }
}

/// Bytes received from the network could not be decoded into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedMessageError {
    pub len: usize,
    pub reason: String,
}

impl Display for MalformedMessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "malformed message of {} bytes: {}", self.len, self.reason)
    }
}

impl std::error::Error for MalformedMessageError {}
