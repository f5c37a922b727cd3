//! Request handlers answering incoming queries from other peers.

use tracing::debug;

use crate::common::MAX_BUCKET_SIZE_K;
use crate::messages::{Command, Signal};

use super::Rpc;

/// Answer a single incoming request, then record the requester as a
/// routing table candidate. The answer is built first: a reply must not
/// hand the requester its own address back.
pub(crate) fn handle_request(rpc: &Rpc, signal: Signal) {
    let Signal { source, command } = signal;

    match command {
        Command::Ping => {
            rpc.send_command(source.address(), &Command::Pong);
        }
        Command::FindNode(target) => {
            let nodes = rpc.closest_nodes(&target, MAX_BUCKET_SIZE_K);
            rpc.send_command(source.address(), &Command::ReturnNodes(target, nodes));
        }
        Command::FindValue(target) => {
            let reply = match rpc.value(&target) {
                Some(value) => Command::ReturnValue(target, value),
                None => {
                    Command::ReturnNodes(target, rpc.closest_nodes(&target, MAX_BUCKET_SIZE_K))
                }
            };
            rpc.send_command(source.address(), &reply);
        }
        Command::Store(key, value) => {
            debug!(?key, from = ?source.id(), "Storing value");
            rpc.insert_value(key, value);
        }
        other => {
            // Replies are routed through the reply registry, never here.
            debug!(?other, "Reply handed to the request handler");
        }
    }

    rpc.add_node(source);
}
