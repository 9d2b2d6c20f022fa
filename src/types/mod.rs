/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of Sieve.
//!
//! Other types and traits, specific to single components, can be found in the "types" and "messages"
//! submodules of their components, e.g., [`crate::pipeline::types`].

pub mod data_types;

pub mod crypto_primitives;

pub mod block;

pub(crate) mod signed_messages;
