//! Shared node state, the receive loop, and the operation drivers built on
//! the iterative lookup engine.

mod config;
mod lookup;
mod replies;
mod server;
mod socket;

use std::net::SocketAddrV4;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use tracing::debug;

use crate::common::{Id, Node, RoutingTable};
use crate::messages::{Command, CommandKind};
use crate::Result;

pub use config::Config;
use lookup::{IterativeLookup, LookupEnd, QueryKind};
use replies::{ReplyEvent, ReplyRegistry};
use socket::KadSocket;

/// α — the number of peers a lookup is seeded with.
pub const ALPHA: usize = 3;

// Stored values in server mode.
const MAX_VALUES: usize = 1000;

/// Shared state of a node: the socket, routing table, value store and reply
/// registry. Lookups run on their caller's thread against this state, while
/// [Rpc::run] pumps the socket on the node's receive thread.
#[derive(Debug)]
pub(crate) struct Rpc {
    id: Id,
    socket: KadSocket,
    routing_table: Mutex<RoutingTable>,
    values: Mutex<LruCache<Id, Bytes>>,
    replies: ReplyRegistry,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl Rpc {
    pub(crate) fn new(config: Config) -> Result<Self> {
        let id = Id::random();
        let socket = KadSocket::new(id, &config)?;

        debug!(?id, address = ?socket.local_addr(), "Node starting");

        Ok(Rpc {
            id,
            socket,
            routing_table: Mutex::new(RoutingTable::new(id)),
            values: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_VALUES).expect("MAX_VALUES is non-zero"),
            )),
            replies: ReplyRegistry::new(),
            request_timeout: config.request_timeout,
            closed: AtomicBool::new(false),
        })
    }

    // === Getters ===

    /// Returns the node's Id
    pub(crate) fn id(&self) -> Id {
        self.id
    }

    /// Returns the address the node is listening to.
    pub(crate) fn local_addr(&self) -> SocketAddrV4 {
        self.socket.local_addr()
    }

    /// Returns the number of nodes in the routing table.
    pub(crate) fn routing_table_size(&self) -> usize {
        self.routing_table.lock().expect("poisoned lock").size()
    }

    // === Operations ===

    /// Look up the value stored under `target`.
    ///
    /// Drives a `FIND_VALUE` lookup seeded with the α closest known peers;
    /// the first peer returning the value completes the lookup.
    pub(crate) fn lookup(&self, target: Id) -> Option<Bytes> {
        let seeds = self.closest_nodes(&target, ALPHA);
        debug!(?target, seeds = seeds.len(), "Looking up value");

        match IterativeLookup::new(self, target, QueryKind::FindValue).run(seeds) {
            LookupEnd::Value(value) => Some(value),
            LookupEnd::Converged { .. } | LookupEnd::Cancelled => None,
        }
    }

    /// Store `value` under `key` at the closest reachable peer.
    ///
    /// Drives a `FIND_NODE` lookup to convergence, then sends a single
    /// fire-and-forget `STORE` to the polled peer closest to `key`.
    pub(crate) fn store(&self, key: Id, value: Bytes) {
        let seeds = self.closest_nodes(&key, ALPHA);
        debug!(?key, seeds = seeds.len(), "Placing value");

        if let LookupEnd::Converged { polled } =
            IterativeLookup::new(self, key, QueryKind::FindNode).run(seeds)
        {
            if let Some(node) = polled.iter().min_by_key(|node| node.id().xor(&key)) {
                debug!(?key, to = ?node.id(), "Sending value to closest polled peer");
                self.send_command(node.address(), &Command::Store(key, value));
            }
        }
    }

    /// Populate the routing table by looking up our own id through `seed`.
    ///
    /// Unlike the other operations the lookup is not seeded from the routing
    /// table; the single seed node bootstraps the frontier.
    pub(crate) fn join_network(&self, seed: Node) {
        let target = self.id;
        debug!(?target, seed = ?seed.id(), "Joining the network");

        let _ = IterativeLookup::new(self, target, QueryKind::FindNode).run(vec![seed]);

        debug!(size = self.routing_table_size(), "Join finished");
    }

    // === Receive loop ===

    /// Pump the socket until [Rpc::shutdown] is called: sweep reply
    /// deadlines, answer incoming requests, route incoming replies.
    pub(crate) fn run(&self) {
        while !self.closed.load(Ordering::Relaxed) {
            self.replies.sweep();

            if let Some(signal) = self.socket.recv_signal() {
                if signal.command.is_request() {
                    server::handle_request(self, signal);
                } else {
                    self.replies.route(signal);
                }
            }
        }

        self.replies.close();
        debug!(id = ?self.id, "Node stopped");
    }

    /// Ask the receive loop to exit; in-flight lookups observe a closed
    /// reply queue and cancel.
    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    // === Collaborator hooks ===

    pub(crate) fn send_command(&self, address: SocketAddrV4, command: &Command) {
        self.socket.send(address, command);
    }

    pub(crate) fn register_reply(
        &self,
        source: Id,
        kinds: &'static [CommandKind],
        sender: flume::Sender<ReplyEvent>,
    ) {
        self.replies.register(source, kinds, sender, self.request_timeout);
    }

    /// Insert a node observed as a signal source, refreshing it if already
    /// present.
    pub(crate) fn add_node(&self, node: Node) {
        self.routing_table.lock().expect("poisoned lock").add(node);
    }

    /// Drop a node that timed out twice within a single lookup.
    pub(crate) fn remove_node(&self, id: &Id) {
        debug!(?id, "Evicting unresponsive node");
        self.routing_table.lock().expect("poisoned lock").remove(id);
    }

    pub(crate) fn closest_nodes(&self, target: &Id, n: usize) -> Vec<Node> {
        self.routing_table
            .lock()
            .expect("poisoned lock")
            .closest(target, n)
    }

    pub(crate) fn value(&self, key: &Id) -> Option<Bytes> {
        self.values.lock().expect("poisoned lock").get(key).cloned()
    }

    pub(crate) fn insert_value(&self, key: Id, value: Bytes) {
        self.values.lock().expect("poisoned lock").put(key, value);
    }

    #[cfg(test)]
    pub(crate) fn contains_node(&self, id: &Id) -> bool {
        self.routing_table.lock().expect("poisoned lock").contains(id)
    }
}
