//! Dht node.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;

use crate::common::{Id, Node};
use crate::rpc::{Config, Rpc};
use crate::Result;

/// A Kademlia DHT node.
///
/// Cheap to clone; every clone drives the same underlying node, so lookups
/// can run concurrently from as many threads as needed. A background thread
/// answers incoming queries and correlates replies; dropping the handle
/// returned by [Dht::new] shuts that thread down.
#[derive(Debug)]
pub struct Dht {
    pub(crate) rpc: Arc<Rpc>,
    handle: Option<JoinHandle<()>>,
}

impl Clone for Dht {
    fn clone(&self) -> Self {
        Dht {
            rpc: Arc::clone(&self.rpc),
            handle: None,
        }
    }
}

impl Dht {
    /// Create a new Dht node with default configuration.
    pub fn new() -> Result<Dht> {
        Dht::with_config(Config::default())
    }

    /// Create a new Dht node with the given configuration.
    pub fn with_config(config: Config) -> Result<Dht> {
        let rpc = Arc::new(Rpc::new(config)?);

        let receive_rpc = Arc::clone(&rpc);
        let handle = thread::spawn(move || receive_rpc.run());

        Ok(Dht {
            rpc,
            handle: Some(handle),
        })
    }

    // === Getters ===

    /// Returns the node's Id.
    pub fn id(&self) -> Id {
        self.rpc.id()
    }

    /// Returns the address the node is listening to.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.rpc.local_addr()
    }

    /// Returns the number of peers in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.rpc.routing_table_size()
    }

    // === Public Methods ===

    /// Look up the value stored under `target`.
    ///
    /// Blocks until a peer returns the value, or until the lookup converges
    /// on the closest reachable peers without finding it.
    pub fn lookup(&self, target: Id) -> Option<Bytes> {
        self.rpc.lookup(target)
    }

    /// Store `value` under `key` at the peer closest to `key`.
    ///
    /// Blocks until the placement lookup converges. The final `STORE`
    /// datagram is fire-and-forget; callers that need stronger publication
    /// guarantees should store through multiple nodes.
    pub fn store(&self, key: Id, value: Bytes) {
        self.rpc.store(key, value)
    }

    /// Join the network through a known seed node, populating the routing
    /// table with the peers closest to us.
    pub fn join_network(&self, seed: Node) {
        self.rpc.join_network(seed)
    }

    /// Ask the node to stop. In-flight lookups observe a closed reply queue
    /// and cancel with their "no result" terminal.
    pub fn shutdown(&self) {
        self.rpc.shutdown()
    }
}

impl Drop for Dht {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.rpc.shutdown();
            let _ = handle.join();
        }
    }
}
