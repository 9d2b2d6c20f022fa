/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Ordering of requests and decisions.
//!
//! Sieve needs every replica to see the same sequence of client requests, and later the same
//! sequence of verified decisions. Both are ordered by a PBFT-style [core](pbft), which the rest of
//! Sieve only reaches through the [adapter](adapter).

pub mod messages;

pub(crate) mod pbft;

pub(crate) mod adapter;

pub(crate) mod timers;
