/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of Sieve, a Byzantine fault tolerant replication protocol for stacks whose
//! execution may not be deterministic.
//!
//! Sieve orders client requests with a PBFT-style core, has the primary of the current epoch execute
//! each ordered request speculatively, and only commits an outcome once a quorum of replicas has
//! verified that it got the same result. Outcomes that cannot be verified are discarded and the
//! primary is replaced.
//!
//! Library users implement [`Network`](networking::network::Network) to connect replicas and
//! [`Stack`](stack::Stack) to execute batches and store blocks, then run a replica either passively
//! through [`SieveReplica`](replica::SieveReplica) or on background threads through
//! [`ReplicaSpec`](replica::ReplicaSpec).

pub mod types;

pub mod networking;

pub mod stack;

pub mod ordering;

pub mod pipeline;

pub mod epoch;

pub mod replica;

pub mod events;

pub(crate) mod event_bus;

pub mod logging;
