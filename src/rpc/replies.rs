//! Registration and correlation of expected replies.
//!
//! Every lookup owns a flume channel; before each query is sent, the lookup
//! registers which reply kinds it expects from which peer. The receive loop
//! routes matching reply signals to the registered channel, and a periodic
//! sweep synthesizes timeouts for registrations whose deadline passed.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::Id;
use crate::messages::{CommandKind, Signal};

/// A single event delivered to a lookup's reply queue.
#[derive(Debug, Clone)]
pub(crate) enum ReplyEvent {
    /// A reply matching a registration, from the peer it was registered for.
    Answer(Signal),
    /// A registered reply's deadline passed without an answer.
    Timeout(Id),
    /// The node is shutting down; no further events will arrive.
    Closed,
}

#[derive(Debug)]
struct ExpectedReply {
    source: Id,
    kinds: &'static [CommandKind],
    deadline: Instant,
    sender: flume::Sender<ReplyEvent>,
}

#[derive(Debug, Default)]
struct Registrations {
    expected: Vec<ExpectedReply>,
    closed: bool,
}

/// The table of outstanding reply registrations, shared between lookups
/// (producers of registrations) and the receive loop (consumer).
#[derive(Debug)]
pub(crate) struct ReplyRegistry {
    inner: Mutex<Registrations>,
}

impl ReplyRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Registrations::default()),
        }
    }

    /// Register an expected reply. Must be called before the corresponding
    /// send, so that a timeout can always be correlated with a polled peer.
    ///
    /// Registering against a closed registry delivers [ReplyEvent::Closed]
    /// right away instead.
    pub(crate) fn register(
        &self,
        source: Id,
        kinds: &'static [CommandKind],
        sender: flume::Sender<ReplyEvent>,
        timeout: Duration,
    ) {
        let mut inner = self.inner.lock().expect("poisoned lock");

        if inner.closed {
            drop(inner);
            let _ = sender.send(ReplyEvent::Closed);
            return;
        }

        inner.expected.push(ExpectedReply {
            source,
            kinds,
            deadline: Instant::now() + timeout,
            sender,
        });
    }

    /// Route an incoming reply signal to the first matching registration,
    /// consuming it. Returns false if no lookup expected this signal.
    pub(crate) fn route(&self, signal: Signal) -> bool {
        let kind = signal.command.kind();

        let registration = {
            let mut inner = self.inner.lock().expect("poisoned lock");

            match inner
                .expected
                .iter()
                .position(|r| r.source == *signal.source.id() && r.kinds.contains(&kind))
            {
                Some(index) => inner.expected.remove(index),
                None => return false,
            }
        };

        trace!(source = ?signal.source.id(), ?kind, "Routing reply");

        // The lookup may have terminated early; a hung up channel is fine.
        let _ = registration.sender.send(ReplyEvent::Answer(signal));

        true
    }

    /// Synthesize [ReplyEvent::Timeout] for every registration whose
    /// deadline has passed.
    pub(crate) fn sweep(&self) {
        let now = Instant::now();

        let mut due = Vec::new();
        {
            let mut inner = self.inner.lock().expect("poisoned lock");

            let mut i = 0;
            while i < inner.expected.len() {
                if inner.expected[i].deadline <= now {
                    due.push(inner.expected.remove(i));
                } else {
                    i += 1;
                }
            }
        }

        for registration in due {
            debug!(source = ?registration.source, "Expected reply timed out");
            let _ = registration
                .sender
                .send(ReplyEvent::Timeout(registration.source));
        }
    }

    /// Flush [ReplyEvent::Closed] to every outstanding registration and
    /// refuse new ones.
    pub(crate) fn close(&self) {
        let drained = {
            let mut inner = self.inner.lock().expect("poisoned lock");
            inner.closed = true;
            std::mem::take(&mut inner.expected)
        };

        for registration in drained {
            let _ = registration.sender.send(ReplyEvent::Closed);
        }
    }
}
