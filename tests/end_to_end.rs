//! End-to-end tests over a small local network of full nodes.

use std::net::SocketAddrV4;
use std::time::Duration;

use ironkad::{Bytes, Config, Dht, Id, Node};

fn spawn_node() -> Dht {
    Dht::with_config(Config {
        port: Some(0),
        request_timeout: Duration::from_millis(400),
    })
    .unwrap()
}

/// The node as a seed other nodes can join through.
fn node_handle(dht: &Dht) -> Node {
    Node::new(
        dht.id(),
        SocketAddrV4::new([127, 0, 0, 1].into(), dht.local_addr().port()),
    )
}

/// Spin up `size` nodes, all joined through the first one.
fn spawn_network(size: usize) -> Vec<Dht> {
    let nodes: Vec<Dht> = (0..size).map(|_| spawn_node()).collect();
    let seed = node_handle(&nodes[0]);

    for node in nodes.iter().skip(1) {
        node.join_network(seed);
    }

    nodes
}

#[test]
fn join_populates_routing_tables() {
    let nodes = spawn_network(5);

    for (i, node) in nodes.iter().enumerate().skip(1) {
        assert!(
            node.routing_table_size() > 0,
            "node {i} did not learn any peers"
        );
    }

    // The seed learned about the joiners too.
    assert!(nodes[0].routing_table_size() > 0);
}

#[test]
fn store_then_lookup_roundtrip() {
    let nodes = spawn_network(6);

    let key = Id::random();
    let value = Bytes::from_static(b"hello from the network");

    nodes[1].store(key, value.clone());

    assert_eq!(nodes[4].lookup(key), Some(value));
}

#[test]
fn lookup_is_idempotent() {
    let nodes = spawn_network(5);

    let key = Id::random();
    let value = Bytes::from_static(b"stable");

    nodes[2].store(key, value.clone());

    let first = nodes[3].lookup(key);
    let second = nodes[3].lookup(key);

    assert_eq!(first, Some(value));
    assert_eq!(first, second);
}

#[test]
fn lookup_of_unpublished_key_returns_none() {
    let nodes = spawn_network(4);

    assert_eq!(nodes[2].lookup(Id::random()), None);
}
