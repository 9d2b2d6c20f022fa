use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{rngs::StdRng, Rng};
use rand_core::OsRng;
use sieve_rs::{
    networking::network::Network,
    replica::{Configuration, SieveReplica},
    types::{block::Batch, data_types::ReplicaID},
};

use super::mem_stack::MemStack;

/// Where a message is coming from and going to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Route {
    pub(crate) src: ReplicaID,
    pub(crate) dst: ReplicaID,
}

/// Decides what happens to a message about to be delivered: `None` drops it, `Some(bytes)` delivers
/// `bytes` instead.
pub(crate) type Filter = Box<dyn FnMut(&Route, Vec<u8>) -> Option<Vec<u8>>>;

struct Envelope {
    route: Route,
    bytes: Vec<u8>,
    bypass_filter: bool,
}

type Queue = Arc<Mutex<VecDeque<Envelope>>>;

/// One replica's view of the simulated network. Everything it sends lands in the shared queue.
#[derive(Clone)]
pub(crate) struct SimEndpoint {
    me: ReplicaID,
    n: usize,
    queue: Queue,
}

impl Network for SimEndpoint {
    fn broadcast(&mut self, message: Vec<u8>) {
        let mut queue = self.queue.lock().unwrap();
        for dst in 0..self.n {
            queue.push_back(Envelope {
                route: Route {
                    src: self.me,
                    dst: ReplicaID::new(dst as u32),
                },
                bytes: message.clone(),
                bypass_filter: false,
            });
        }
    }

    // Messages are delivered by `SimNetwork` directly.
    fn recv(&mut self) -> Option<(ReplicaID, Vec<u8>)> {
        None
    }
}

/// Puts messages back into the queue without passing them through the filter again.
#[derive(Clone)]
pub(crate) struct Injector {
    queue: Queue,
}

impl Injector {
    pub(crate) fn inject(&self, route: Route, bytes: Vec<u8>) {
        self.queue.lock().unwrap().push_back(Envelope {
            route,
            bytes,
            bypass_filter: true,
        });
    }
}

pub(crate) struct SimOptions {
    pub(crate) request_timeout: Duration,
    pub(crate) new_view_timeout: Duration,
    pub(crate) last_new_view_timeout: Duration,
    pub(crate) commit_quorum: Option<usize>,
}

impl Default for SimOptions {
    fn default() -> Self {
        SimOptions {
            request_timeout: Duration::from_millis(200),
            new_view_timeout: Duration::from_millis(400),
            last_new_view_timeout: Duration::from_millis(400),
            commit_quorum: None,
        }
    }
}

/// A deterministic network of replicas that all live on the test thread.
///
/// Every message goes through a single FIFO queue (or is picked from it at random, if reordering is
/// enabled) and is delivered by [`process`](Self::process). Timers only fire when the harness is run
/// with [`run_until`](Self::run_until) or [`run_for`](Self::run_for).
pub(crate) struct SimNetwork {
    replicas: Vec<SieveReplica<SimEndpoint, MemStack>>,
    queue: Queue,
    filter: Option<Filter>,
    rng: Option<StdRng>,
}

impl SimNetwork {
    pub(crate) fn new(stacks: Vec<MemStack>) -> SimNetwork {
        SimNetwork::with_options(stacks, SimOptions::default())
    }

    pub(crate) fn with_options(stacks: Vec<MemStack>, options: SimOptions) -> SimNetwork {
        let n = stacks.len();
        let mut csprg = OsRng {};
        let keypairs: Vec<SigningKey> = (0..n).map(|_| SigningKey::generate(&mut csprg)).collect();
        let verifying_keys: Vec<VerifyingKey> = keypairs.iter().map(|kp| kp.verifying_key()).collect();
        let queue: Queue = Arc::new(Mutex::new(VecDeque::new()));

        let replicas = keypairs
            .into_iter()
            .zip(stacks)
            .enumerate()
            .map(|(i, (keypair, stack))| {
                let mut configuration = Configuration::builder()
                    .me(keypair)
                    .replicas(verifying_keys.clone())
                    .request_timeout(options.request_timeout)
                    .new_view_timeout(options.new_view_timeout)
                    .last_new_view_timeout(options.last_new_view_timeout)
                    .log_events(true)
                    .build();
                configuration.commit_quorum = options.commit_quorum;

                let endpoint = SimEndpoint {
                    me: ReplicaID::new(i as u32),
                    n,
                    queue: queue.clone(),
                };
                match SieveReplica::new(configuration, endpoint, stack) {
                    Ok(replica) => replica,
                    Err(err) => panic!("invalid configuration: {}", err),
                }
            })
            .collect();

        SimNetwork {
            replicas,
            queue,
            filter: None,
            rng: None,
        }
    }

    pub(crate) fn replica(&self, i: usize) -> &SieveReplica<SimEndpoint, MemStack> {
        &self.replicas[i]
    }

    pub(crate) fn replica_mut(&mut self, i: usize) -> &mut SieveReplica<SimEndpoint, MemStack> {
        &mut self.replicas[i]
    }

    pub(crate) fn replicas(&self) -> &[SieveReplica<SimEndpoint, MemStack>] {
        &self.replicas
    }

    pub(crate) fn set_filter(&mut self, filter: Filter) {
        self.filter = Some(filter);
    }

    pub(crate) fn clear_filter(&mut self) {
        self.filter = None;
    }

    pub(crate) fn injector(&self) -> Injector {
        Injector {
            queue: self.queue.clone(),
        }
    }

    /// Deliver queued messages in a random order drawn from `rng` instead of in FIFO order.
    pub(crate) fn reorder_with(&mut self, rng: StdRng) {
        self.rng = Some(rng);
    }

    pub(crate) fn submit(&mut self, i: usize, batch: Batch) {
        if let Err(err) = self.replicas[i].submit(batch) {
            log::warn!("Replica {} failed to process a submitted batch: {}", i, err);
        }
    }

    /// Deliver messages until the queue is empty.
    pub(crate) fn process(&mut self) {
        while let Some(envelope) = self.next_envelope() {
            let bytes = if envelope.bypass_filter {
                Some(envelope.bytes)
            } else {
                match &mut self.filter {
                    Some(filter) => filter(&envelope.route, envelope.bytes),
                    None => Some(envelope.bytes),
                }
            };
            let bytes = match bytes {
                Some(bytes) => bytes,
                None => continue,
            };

            let Route { src, dst } = envelope.route;
            if let Err(err) = self.replicas[dst.int() as usize].on_receive(src, &bytes) {
                log::warn!("Replica {} failed to process a message from {}: {}", dst, src, err);
            }
        }
    }

    fn next_envelope(&mut self) -> Option<Envelope> {
        let mut queue = self.queue.lock().unwrap();
        match &mut self.rng {
            Some(rng) if !queue.is_empty() => {
                let index = rng.gen_range(0, queue.len());
                queue.remove(index)
            }
            _ => queue.pop_front(),
        }
    }

    pub(crate) fn tick(&mut self) {
        let now = Instant::now();
        for replica in &mut self.replicas {
            if let Err(err) = replica.tick_at(now) {
                log::warn!("Replica {} failed to process a timeout: {}", replica.id(), err);
            }
        }
    }

    /// Process messages and fire timers until `done` holds or `timeout` elapses. Returns whether
    /// `done` holds.
    pub(crate) fn run_until(&mut self, done: impl Fn(&SimNetwork) -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            self.process();
            if done(self) {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            self.tick();
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Process messages and fire timers for `duration`.
    pub(crate) fn run_for(&mut self, duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            self.process();
            self.tick();
            thread::sleep(Duration::from_millis(5));
        }
        self.process();
    }

    /// Whether no message is in flight and every replica is idle.
    pub(crate) fn is_idle(&self) -> bool {
        self.queue.lock().unwrap().is_empty() && self.replicas.iter().all(|replica| replica.is_idle())
    }

    /// Get the blockchain size of every replica.
    pub(crate) fn blockchain_sizes(&self) -> Vec<u64> {
        self.replicas
            .iter()
            .map(|replica| replica.blockchain_size().unwrap().int())
            .collect()
    }
}
