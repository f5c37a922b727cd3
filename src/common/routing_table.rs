//! Simplified Kademlia routing table

use std::collections::BTreeMap;

use crate::common::{Id, Node};

/// K = the maximum size of a k-bucket, and the width of a lookup frontier.
pub const MAX_BUCKET_SIZE_K: usize = 7;

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
pub struct RoutingTable {
    id: Id,
    buckets: BTreeMap<u8, KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        let buckets = BTreeMap::new();

        RoutingTable { id, buckets }
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    // === Public Methods ===

    /// Attempts to add a node to this routing table, and return `true` if it did.
    ///
    /// Re-adding a node that is already present refreshes its `last_seen`
    /// time and its address.
    pub fn add(&mut self, node: Node) -> bool {
        let distance = self.id.distance(node.id());

        if distance == 0 {
            // Do not add self to the routing_table
            return false;
        }

        let bucket = self.buckets.entry(distance).or_default();

        bucket.add(node)
    }

    /// Remove a node from this routing table.
    pub fn remove(&mut self, node_id: &Id) {
        let distance = self.id.distance(node_id);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.remove(node_id)
        }
    }

    /// Return the `n` nodes closest to the target, ascending by XOR distance.
    pub fn closest(&self, target: &Id, n: usize) -> Vec<Node> {
        let mut nodes = self.to_vec();
        nodes.sort_by_key(|node| node.id().xor(target));
        nodes.truncate(n);

        nodes
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of nodes in this routing table.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.nodes.len())
    }

    /// Export an owned vector of nodes from this routing table.
    pub fn to_vec(&self) -> Vec<Node> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.nodes.iter().copied())
            .collect()
    }

    pub(crate) fn contains(&self, node_id: &Id) -> bool {
        let distance = self.id.distance(node_id);

        if let Some(bucket) = self.buckets.get(&distance) {
            if bucket.contains(node_id) {
                return true;
            }
        }
        false
    }
}

/// Kbuckets are similar to LRU caches that replace stale unresponsive nodes,
/// without dropping any responsive nodes in the process.
#[derive(Debug, Clone)]
pub struct KBucket {
    /// Nodes in the k-bucket, sorted by the least recently seen.
    nodes: Vec<Node>,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            nodes: Vec::with_capacity(MAX_BUCKET_SIZE_K),
        }
    }

    // === Public Methods ===

    pub fn add(&mut self, incoming: Node) -> bool {
        if let Some(index) = self.nodes.iter().position(|n| n.id() == incoming.id()) {
            // Move the node to the end of the bucket, updating its
            // `last_seen` and possibly its address.
            self.nodes.remove(index);
            self.nodes.push(incoming);

            true
        } else if self.nodes.len() < MAX_BUCKET_SIZE_K {
            self.nodes.push(incoming);
            true
        } else if self.nodes[0].is_stale() {
            // Replace the least recently seen node with the new one
            self.nodes.remove(0);
            self.nodes.push(incoming);

            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, node_id: &Id) {
        self.nodes.retain(|node| node.id() != node_id);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn contains(&self, id: &Id) -> bool {
        self.nodes.iter().any(|node| node.id() == id)
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddrV4;

    use crate::common::{Id, KBucket, Node, RoutingTable, MAX_BUCKET_SIZE_K};

    /// A node whose id shares no prefix with `local`, so that all of them
    /// land in the same (deepest) bucket.
    fn far_node(local: &Id, low_byte: u8) -> Node {
        let mut bytes = *local.as_bytes();
        bytes[0] ^= 0x80;
        bytes[19] = low_byte;
        Node::new(Id(bytes), SocketAddrV4::new([127, 0, 0, 1].into(), 6881))
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random());
        assert!(table.is_empty());

        table.add(Node::random());
        assert!(!table.is_empty());
    }

    #[test]
    fn contains() {
        let mut table = RoutingTable::new(Id::random());

        let node = Node::random();

        assert!(!table.contains(node.id()));

        table.add(node);
        assert!(table.contains(node.id()));
    }

    #[test]
    fn remove() {
        let mut table = RoutingTable::new(Id::random());

        let node = Node::random();

        table.add(node);
        assert!(table.contains(node.id()));

        table.remove(node.id());
        assert!(!table.contains(node.id()));
    }

    #[test]
    fn buckets_are_sets() {
        let mut table = RoutingTable::new(Id::random());

        let node1 = Node::random();
        let node2 = Node::new(*node1.id(), node1.address());

        table.add(node1);
        table.add(node2);

        assert_eq!(table.size(), 1);
    }

    #[test]
    fn should_not_add_self() {
        let mut table = RoutingTable::new(Id::random());
        let node = Node::new(*table.id(), SocketAddrV4::new(0.into(), 0));

        assert!(!table.add(node));
        assert!(table.is_empty())
    }

    #[test]
    fn should_not_add_more_than_k() {
        let mut bucket = KBucket::new();

        for i in 0..MAX_BUCKET_SIZE_K {
            let node = Node::random();
            assert!(bucket.add(node), "Failed to add node {i}");
        }

        let node = Node::random();

        assert!(!bucket.add(node));
    }

    #[test]
    fn readd_refreshes_address() {
        let mut bucket = KBucket::new();

        let node1 = Node::random();
        let node2 = Node::new(
            *node1.id(),
            SocketAddrV4::new([127, 0, 0, 1].into(), 6882),
        );

        bucket.add(node1);
        bucket.add(Node::random());
        bucket.add(node2);

        assert_eq!(bucket.nodes.len(), 2);
        assert_eq!(bucket.nodes[1].id(), node1.id());
        assert_eq!(bucket.nodes[1].address(), node2.address());
    }

    #[test]
    fn closest_is_ordered_by_xor_distance() {
        let local = Id::random();
        let mut table = RoutingTable::new(local);

        for low_byte in [0x1f, 0x03, 0x6a, 0x0c, 0x55] {
            table.add(far_node(&local, low_byte));
        }

        let mut target_bytes = *local.as_bytes();
        target_bytes[0] ^= 0x80;
        target_bytes[19] = 0;
        let target = Id(target_bytes);

        let closest = table.closest(&target, 3);

        assert_eq!(closest.len(), 3);
        assert_eq!(closest[0].id().as_bytes()[19], 0x03);
        assert_eq!(closest[1].id().as_bytes()[19], 0x0c);
        assert_eq!(closest[2].id().as_bytes()[19], 0x1f);

        let all = table.closest(&target, MAX_BUCKET_SIZE_K);
        assert_eq!(all.len(), 5);
    }
}
