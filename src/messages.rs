//! Serialize and deserialize datagrams exchanged between peers.
//!
//! A datagram is `sender_id (20 bytes) | tag (1 byte) | payload`. The sender
//! id in the header plus the UDP envelope is enough to reconstruct the
//! source [Node] of every incoming command.

use std::net::SocketAddrV4;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::{Id, Node, ID_SIZE};

const PING: u8 = 0;
const PONG: u8 = 1;
const STORE: u8 = 2;
const FIND_NODE: u8 = 3;
const FIND_VALUE: u8 = 4;
const RETURN_NODES: u8 = 5;
const RETURN_VALUE: u8 = 6;

/// A command sent to, or received from, another peer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Ping,
    Pong,
    Store(Id, Bytes),
    FindNode(Id),
    FindValue(Id),
    ReturnNodes(Id, Vec<Node>),
    ReturnValue(Id, Bytes),
}

/// The payload-free discriminant of a [Command], used to describe which
/// replies a lookup expects from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Ping,
    Pong,
    Store,
    FindNode,
    FindValue,
    ReturnNodes,
    ReturnValue,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Ping => CommandKind::Ping,
            Command::Pong => CommandKind::Pong,
            Command::Store(..) => CommandKind::Store,
            Command::FindNode(_) => CommandKind::FindNode,
            Command::FindValue(_) => CommandKind::FindValue,
            Command::ReturnNodes(..) => CommandKind::ReturnNodes,
            Command::ReturnValue(..) => CommandKind::ReturnValue,
        }
    }

    /// Commands answered by the background responder, as opposed to replies
    /// correlated with an outstanding query.
    pub fn is_request(&self) -> bool {
        matches!(
            self.kind(),
            CommandKind::Ping | CommandKind::Store | CommandKind::FindNode | CommandKind::FindValue
        )
    }
}

/// An incoming command together with the peer it came from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Signal {
    pub source: Node,
    pub command: Command,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub(crate) enum DecodeError {
    #[error("Datagram shorter than its declared contents")]
    Truncated,

    #[error("Unknown command tag: {0}")]
    UnknownTag(u8),
}

/// Encode a command into a datagram on behalf of `sender_id`.
pub(crate) fn to_bytes(sender_id: &Id, command: &Command) -> Bytes {
    let mut buf = BytesMut::with_capacity(ID_SIZE + 1);
    buf.put_slice(sender_id.as_bytes());

    match command {
        Command::Ping => buf.put_u8(PING),
        Command::Pong => buf.put_u8(PONG),
        Command::Store(key, value) => {
            buf.put_u8(STORE);
            buf.put_slice(key.as_bytes());
            buf.put_slice(value);
        }
        Command::FindNode(target) => {
            buf.put_u8(FIND_NODE);
            buf.put_slice(target.as_bytes());
        }
        Command::FindValue(target) => {
            buf.put_u8(FIND_VALUE);
            buf.put_slice(target.as_bytes());
        }
        Command::ReturnNodes(target, nodes) => {
            buf.put_u8(RETURN_NODES);
            buf.put_slice(target.as_bytes());
            buf.put_u8(nodes.len() as u8);
            for node in nodes {
                buf.put_slice(node.id().as_bytes());
                buf.put_slice(&node.address().ip().octets());
                buf.put_u16(node.address().port());
            }
        }
        Command::ReturnValue(target, value) => {
            buf.put_u8(RETURN_VALUE);
            buf.put_slice(target.as_bytes());
            buf.put_slice(value);
        }
    }

    buf.freeze()
}

/// Decode a datagram received from `from` into a [Signal].
pub(crate) fn from_bytes(bytes: &[u8], from: SocketAddrV4) -> Result<Signal, DecodeError> {
    let mut buf = bytes;

    let sender_id = read_id(&mut buf)?;
    if !buf.has_remaining() {
        return Err(DecodeError::Truncated);
    }
    let tag = buf.get_u8();

    let command = match tag {
        PING => Command::Ping,
        PONG => Command::Pong,
        STORE => {
            let key = read_id(&mut buf)?;
            Command::Store(key, Bytes::copy_from_slice(buf))
        }
        FIND_NODE => Command::FindNode(read_id(&mut buf)?),
        FIND_VALUE => Command::FindValue(read_id(&mut buf)?),
        RETURN_NODES => {
            let target = read_id(&mut buf)?;
            if !buf.has_remaining() {
                return Err(DecodeError::Truncated);
            }
            let count = buf.get_u8();

            let mut nodes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let id = read_id(&mut buf)?;
                if buf.remaining() < 6 {
                    return Err(DecodeError::Truncated);
                }
                let mut octets = [0_u8; 4];
                buf.copy_to_slice(&mut octets);
                let port = buf.get_u16();

                nodes.push(Node::new(id, SocketAddrV4::new(octets.into(), port)));
            }

            Command::ReturnNodes(target, nodes)
        }
        RETURN_VALUE => {
            let target = read_id(&mut buf)?;
            Command::ReturnValue(target, Bytes::copy_from_slice(buf))
        }
        tag => return Err(DecodeError::UnknownTag(tag)),
    };

    Ok(Signal {
        source: Node::new(sender_id, from),
        command,
    })
}

fn read_id(buf: &mut &[u8]) -> Result<Id, DecodeError> {
    if buf.remaining() < ID_SIZE {
        return Err(DecodeError::Truncated);
    }

    let mut bytes = [0_u8; ID_SIZE];
    buf.copy_to_slice(&mut bytes);

    Ok(Id(bytes))
}

#[cfg(test)]
mod test {
    use super::*;

    fn from() -> SocketAddrV4 {
        SocketAddrV4::new([127, 0, 0, 1].into(), 6881)
    }

    #[test]
    fn return_nodes_roundtrip() {
        let sender = Id::random();
        let target = Id::random();
        let nodes = vec![
            Node::new(Id::random(), SocketAddrV4::new([10, 0, 0, 1].into(), 4000)),
            Node::new(Id::random(), SocketAddrV4::new([10, 0, 0, 2].into(), 4001)),
        ];

        let bytes = to_bytes(&sender, &Command::ReturnNodes(target, nodes.clone()));
        let signal = from_bytes(&bytes, from()).unwrap();

        assert_eq!(*signal.source.id(), sender);
        assert_eq!(signal.source.address(), from());

        match signal.command {
            Command::ReturnNodes(decoded_target, decoded_nodes) => {
                assert_eq!(decoded_target, target);
                assert_eq!(decoded_nodes.len(), 2);
                for (decoded, original) in decoded_nodes.iter().zip(&nodes) {
                    assert_eq!(decoded.id(), original.id());
                    assert_eq!(decoded.address(), original.address());
                }
            }
            other => panic!("Expected ReturnNodes, got {:?}", other),
        }
    }

    #[test]
    fn store_roundtrip() {
        let sender = Id::random();
        let key = Id::random();
        let value = Bytes::from_static(b"opaque payload");

        let bytes = to_bytes(&sender, &Command::Store(key, value.clone()));
        let signal = from_bytes(&bytes, from()).unwrap();

        assert_eq!(signal.command, Command::Store(key, value));
    }

    #[test]
    fn empty_payloads() {
        let sender = Id::random();

        for command in [Command::Ping, Command::Pong] {
            let bytes = to_bytes(&sender, &command);
            let signal = from_bytes(&bytes, from()).unwrap();
            assert_eq!(signal.command, command);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(from_bytes(&[], from()), Err(DecodeError::Truncated));
        assert_eq!(
            from_bytes(&[0_u8; ID_SIZE], from()),
            Err(DecodeError::Truncated)
        );

        let mut unknown = vec![0_u8; ID_SIZE];
        unknown.push(200);
        assert_eq!(from_bytes(&unknown, from()), Err(DecodeError::UnknownTag(200)));

        let mut truncated_nodes = to_bytes(&Id::random(), &Command::FindNode(Id::random())).to_vec();
        truncated_nodes.truncate(ID_SIZE + 1 + 10);
        assert_eq!(from_bytes(&truncated_nodes, from()), Err(DecodeError::Truncated));
    }
}
