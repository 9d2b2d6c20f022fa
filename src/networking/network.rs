/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The trait that library users implement to connect replicas to each other.

use crate::types::data_types::ReplicaID;

/// A transport that carries encoded [`Message`](super::messages::Message)s between replicas.
///
/// Implementations may reorder, delay, drop, or duplicate messages. Sieve stays safe under all of
/// these, and regains liveness through epoch change once the network stabilizes.
pub trait Network: Clone + Send {
    /// Send a message to all replicas, including this one, without blocking. Every message a replica
    /// sends is broadcast.
    fn broadcast(&mut self, message: Vec<u8>);

    /// Receive a message from any replica. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(ReplicaID, Vec<u8>)>;
}
