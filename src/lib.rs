//! Kademlia distributed hash table node.
//!
//! A node joins the network through a few already known nodes, answers `ping`, `store`,
//! `find_node` and `find_value` requests from its peers, and finds values and nodes using
//! iterative lookups with a bounded number of concurrent requests.

pub mod config;
pub mod routing;
pub mod rpc;
pub mod socket;

mod builder;
mod compact;
mod handler;
mod id;
mod lookup;
mod message;
mod storage;
mod transport;

pub use crate::builder::{Dht, DhtBuilder};
pub use crate::config::Config;
pub use crate::id::{Key, LengthError, NodeId, ID_LEN};
pub use crate::routing::node::NodeHandle;
pub use crate::rpc::{FindValueReply, RequestHandler, Rpc, RpcError};
pub use crate::socket::SocketTrait;
pub use crate::transport::Transport;
