//! The iterative lookup state machine.
//!
//! A lookup drives one query kind (`FIND_NODE` or `FIND_VALUE`) against an
//! adaptively maintained frontier of candidate peers: it seeds the frontier,
//! blocks on its reply queue, and on each answer or timeout decides whether
//! to probe further, keep waiting, or terminate. The same machine powers
//! value lookups, value placement and joining the network; the operation
//! drivers in [super::Rpc] only choose the query kind and interpret the
//! terminal state.

use std::collections::HashSet;

use bytes::Bytes;

use crate::common::{Id, Node, MAX_BUCKET_SIZE_K};
use crate::messages::{Command, CommandKind};

use super::replies::ReplyEvent;
use super::Rpc;

/// Which query a lookup sends, and which replies it accepts.
#[derive(Debug, Clone, Copy)]
pub(crate) enum QueryKind {
    FindNode,
    FindValue,
}

impl QueryKind {
    fn command(&self, target: Id) -> Command {
        match self {
            QueryKind::FindNode => Command::FindNode(target),
            QueryKind::FindValue => Command::FindValue(target),
        }
    }

    fn expected_replies(&self) -> &'static [CommandKind] {
        match self {
            QueryKind::FindNode => &[CommandKind::ReturnNodes],
            QueryKind::FindValue => &[CommandKind::ReturnNodes, CommandKind::ReturnValue],
        }
    }
}

/// Terminal state of a lookup.
#[derive(Debug)]
pub(crate) enum LookupEnd {
    /// A peer returned the value a `FIND_VALUE` lookup was after.
    Value(Bytes),
    /// The closest known peers have all been polled; the frontier cannot be
    /// improved any further.
    Converged { polled: Vec<Node> },
    /// No progress is possible: nothing to seed from, every outstanding
    /// query failed, or the node is shutting down.
    Cancelled,
}

/// Per-lookup state. Owned by the thread driving the lookup; the reply
/// queue is its only coupling to the rest of the node.
pub(crate) struct IterativeLookup<'a> {
    rpc: &'a Rpc,
    target: Id,
    kind: QueryKind,
    events: flume::Receiver<ReplyEvent>,
    replies: flume::Sender<ReplyEvent>,
    /// Candidate peers the lookup is aware of.
    known: HashSet<Node>,
    /// Polled peers still awaiting a reply or a timeout.
    pending: HashSet<Node>,
    /// Peers queried at least once.
    polled: HashSet<Node>,
    /// Peers that timed out once already; the next timeout evicts them.
    timed_out: HashSet<Node>,
}

impl<'a> IterativeLookup<'a> {
    pub(crate) fn new(rpc: &'a Rpc, target: Id, kind: QueryKind) -> Self {
        let (replies, events) = flume::unbounded();

        Self {
            rpc,
            target,
            kind,
            events,
            replies,
            known: HashSet::new(),
            pending: HashSet::new(),
            polled: HashSet::new(),
            timed_out: HashSet::new(),
        }
    }

    /// Drive the lookup to a terminal state, starting from `seeds`.
    pub(crate) fn run(mut self, seeds: Vec<Node>) -> LookupEnd {
        if seeds.is_empty() {
            return LookupEnd::Cancelled;
        }

        for node in &seeds {
            self.send_query(node);
        }
        self.known.extend(seeds);

        self.wait_for_reply()
    }

    // === Private Methods ===

    fn wait_for_reply(&mut self) -> LookupEnd {
        loop {
            let event = match self.events.recv() {
                Ok(event) => event,
                Err(flume::RecvError::Disconnected) => ReplyEvent::Closed,
            };

            match event {
                ReplyEvent::Answer(signal) => {
                    self.rpc.add_node(signal.source);
                    self.pending.remove(&signal.source);

                    match (self.kind, signal.command) {
                        (QueryKind::FindValue, Command::ReturnValue(_, value)) => {
                            return LookupEnd::Value(value);
                        }
                        (_, Command::ReturnNodes(_, nodes)) => {
                            if let Some(end) = self.continue_lookup(nodes) {
                                return end;
                            }
                        }
                        // A reply kind this lookup has no use for; keep
                        // waiting for the outstanding queries.
                        _ => {}
                    }
                }
                ReplyEvent::Timeout(id) => {
                    if let Some(end) = self.handle_timeout(id) {
                        return end;
                    }
                }
                ReplyEvent::Closed => {
                    return LookupEnd::Cancelled;
                }
            }
        }
    }

    /// Decide, given freshly returned candidate `nodes`, whether the
    /// frontier can still be improved.
    fn continue_lookup(&mut self, nodes: Vec<Node>) -> Option<LookupEnd> {
        // Up to K candidates that have not been polled yet.
        let mut new_known: Vec<Node> = Vec::with_capacity(MAX_BUCKET_SIZE_K);
        for node in nodes.iter().chain(self.known.iter()) {
            if new_known.len() == MAX_BUCKET_SIZE_K {
                break;
            }
            if !self.polled.contains(node) && !new_known.contains(node) {
                new_known.push(*node);
            }
        }

        // The K best peers seen so far, polled or not.
        let mut closest: Vec<Node> = new_known.iter().chain(self.polled.iter()).copied().collect();
        closest.sort_by_key(|node| node.id().xor(&self.target));
        closest.truncate(MAX_BUCKET_SIZE_K);

        let closest_polled = closest.iter().all(|node| self.polled.contains(node));

        if !new_known.is_empty() && !closest_polled {
            // An unpolled candidate is still among the K best; probe the
            // most promising one.
            let next = *new_known
                .iter()
                .min_by_key(|node| node.id().xor(&self.target))
                .expect("new_known is not empty");

            self.send_query(&next);
            self.known = new_known.into_iter().collect();

            None
        } else if !self.pending.is_empty() {
            // The frontier looks exhausted, but outstanding queries may
            // still return closer peers.
            None
        } else {
            Some(LookupEnd::Converged {
                polled: self.polled.iter().copied().collect(),
            })
        }
    }

    /// One retransmission per peer; a second timeout evicts the peer from
    /// the routing table and the frontier.
    fn handle_timeout(&mut self, id: Id) -> Option<LookupEnd> {
        // The registry only synthesizes timeouts for registered queries, and
        // every query is registered before it is sent.
        let node = *self
            .polled
            .iter()
            .find(|node| *node.id() == id)
            .expect("timeout for a peer that was never polled");

        if self.timed_out.contains(&node) {
            self.rpc.remove_node(&id);
            self.pending.remove(&node);
            self.known.remove(&node);
            self.polled.remove(&node);
            self.timed_out.remove(&node);
        } else {
            self.pending.remove(&node);
            self.timed_out.insert(node);
            self.send_query(&node);
        }

        if self.pending.is_empty() {
            Some(LookupEnd::Cancelled)
        } else {
            None
        }
    }

    /// Register the expected reply, transmit the query, and record the peer
    /// as polled and pending.
    fn send_query(&mut self, node: &Node) {
        self.rpc
            .register_reply(*node.id(), self.kind.expected_replies(), self.replies.clone());
        self.rpc
            .send_command(node.address(), &self.kind.command(self.target));

        self.polled.insert(*node);
        self.pending.insert(*node);
    }
}
