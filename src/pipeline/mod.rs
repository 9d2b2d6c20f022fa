/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The execute/verify pipeline.
//!
//! Once a request is ordered, the primary of the current epoch executes it speculatively and tells
//! every replica to do the same with an [`Execute`](messages::Execute). Every replica that executes
//! it reports the outcome it got in a signed [`Verify`](messages::Verify). If a commit quorum of
//! reports agrees with the primary's outcome, the primary bundles them into a
//! [`Decision`](types::Decision), which is ordered like any request and then committed by every
//! replica, rolling back its own speculative state if it disagreed.
//!
//! If so many reports disagree that a commit quorum can never form, the slot is discarded and the
//! replica asks for a new epoch.

pub mod messages;

pub mod types;

pub(crate) mod implementation;
