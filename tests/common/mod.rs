#![allow(dead_code)]

pub(crate) mod logging;

pub(crate) mod mem_stack;

pub(crate) mod network;

pub(crate) mod sim_network;
