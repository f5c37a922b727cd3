//! Struct and implementation of the Node entry in the Kademlia routing table
use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    net::SocketAddrV4,
    time::{Duration, Instant},
};

use crate::common::Id;

/// The age of a node's last_seen time before it is considered stale and replaced in a full bucket
/// on inserting a new node.
pub const STALE_TIME: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Copy)]
/// Node entry in the Kademlia routing table, or a peer learned during a lookup.
pub struct Node {
    pub(crate) id: Id,
    pub(crate) address: SocketAddrV4,
    pub(crate) last_seen: Instant,
}

impl Debug for Node {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("last_seen", &self.last_seen.elapsed().as_secs())
            .finish()
    }
}

/// Nodes are identified by their id alone; a peer that moved to a new
/// address is still the same peer.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddrV4) -> Node {
        Node {
            id,
            address,
            last_seen: Instant::now(),
        }
    }

    /// Creates a node with random Id for testing purposes.
    pub fn random() -> Node {
        Node {
            id: Id::random(),
            address: SocketAddrV4::new(0.into(), 0),
            last_seen: Instant::now(),
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    /// Node is last seen more than a threshold ago.
    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > STALE_TIME
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equality_is_by_id() {
        let node = Node::random();
        let moved = Node::new(*node.id(), SocketAddrV4::new([127, 0, 0, 1].into(), 6881));

        assert_eq!(node, moved);
        assert_ne!(node, Node::random());
    }
}
