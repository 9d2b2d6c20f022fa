use std::sync::{
    mpsc::{self, Receiver, Sender, TryRecvError},
    Arc, Mutex,
};

use sieve_rs::{networking::network::Network, types::data_types::ReplicaID};

/// A mock network stub which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: ReplicaID,
    all_peers: Vec<Sender<(ReplicaID, Vec<u8>)>>,
    inbox: Arc<Mutex<Receiver<(ReplicaID, Vec<u8>)>>>,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Vec<u8>) {
        for peer in &self.all_peers {
            let _ = peer.send((self.me, message.clone()));
        }
    }

    fn recv(&mut self) -> Option<(ReplicaID, Vec<u8>)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(n: usize) -> Vec<NetworkStub> {
    let (all_peers, inboxes): (Vec<_>, Vec<_>) = (0..n).map(|_| mpsc::channel::<(ReplicaID, Vec<u8>)>()).unzip();

    inboxes
        .into_iter()
        .enumerate()
        .map(|(i, inbox)| NetworkStub {
            me: ReplicaID::new(i as u32),
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
