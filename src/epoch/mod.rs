/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Epoch change: replacing a primary that stopped making progress or proposed an outcome that the
//! replicas could not agree on.
//!
//! ## Protocol
//!
//! A replica asks for epoch `e` by broadcasting a signed [`EpochChange`](messages::EpochChange)
//! that carries how far it has delivered and everything it saw prepared. Once `f + 1` replicas ask
//! for epochs above the one a replica is in (or asking for), it joins them at the lowest of those
//! epochs. Once the primary of `e` has asked for `e` itself and holds a quorum of requests for it,
//! it broadcasts a [`NewEpoch`](messages::NewEpoch) containing them and enters `e`. Replicas that
//! receive a valid `NewEpoch` enter `e` too.
//!
//! On entering `e`, every replica re-issues the same entries, computed from the epoch changes in the
//! `NewEpoch`, so that anything that may have been committed in an earlier epoch keeps its sequence
//! number.

pub mod messages;

pub(crate) mod implementation;
