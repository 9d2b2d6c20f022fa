/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deadline-based timers.
//!
//! Timers never fire on their own. The replica's event loop calls [`tick`](super::adapter::OrderingAdapter::tick)
//! regularly, and an expired deadline is then handled like any other event.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub(crate) fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the timer to expire `timeout` from now, replacing any earlier deadline.
    pub(crate) fn start(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    pub(crate) fn stop(&mut self) {
        self.deadline = None;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// If the timer is armed and its deadline has passed at `now`, disarm it and return true.
    pub(crate) fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
