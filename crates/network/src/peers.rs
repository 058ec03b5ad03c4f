use hashweave_types::{AddressBook, NodeId};
use std::collections::BTreeMap;

/// A gossip neighbour taken from the address book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node_id: NodeId,
    pub endpoint: Option<String>,
    pub connected: bool,
}

impl Peer {
    pub fn new(node_id: NodeId, endpoint: Option<String>) -> Self {
        Self {
            node_id,
            endpoint,
            connected: false,
        }
    }
}

/// Known peers and their connection status.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: BTreeMap<NodeId, Peer>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every member of `book` except `self_id`.
    pub fn from_address_book(book: &AddressBook, self_id: NodeId) -> Self {
        let mut directory = Self::default();
        for address in book.iter().filter(|a| a.node_id != self_id) {
            directory.upsert_peer(Peer::new(address.node_id, address.endpoint.clone()));
        }
        directory
    }

    pub fn upsert_peer(&mut self, peer: Peer) {
        self.peers.insert(peer.node_id, peer);
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Peer> {
        self.peers.get(&node_id)
    }

    pub fn mark_connected(&mut self, node_id: NodeId, connected: bool) {
        if let Some(peer) = self.peers.get_mut(&node_id) {
            peer.connected = connected;
        }
    }

    pub fn list_connected(&self) -> Vec<Peer> {
        self.peers.values().filter(|peer| peer.connected).cloned().collect()
    }

    pub fn list_all(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    /// Peers this node dials. The other side of each pair dials us, so every
    /// pair of members shares exactly one connection.
    pub fn outbound(&self, self_id: NodeId) -> Vec<Peer> {
        self.peers
            .values()
            .filter(|peer| peer.node_id > self_id && peer.endpoint.is_some())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
