#![doc = include_str!("../README.md")]

// Public modules
mod common;
mod error;
mod messages;

pub mod dht;
pub mod rpc;

pub use crate::common::{Distance, Id, Node, RoutingTable, ID_SIZE, MAX_BUCKET_SIZE_K};
pub use bytes::Bytes;
pub use dht::Dht;
pub use error::Error;
pub use rpc::{Config, ALPHA};

// Alias Result to be the crate Result.
pub type Result<T, E = error::Error> = core::result::Result<T, E>;
