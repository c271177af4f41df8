//! The seams between the protocol engine and the transport.
//!
//! [`Rpc`] is what the engine calls to reach a remote peer. [`RequestHandler`] is what the
//! transport calls when a remote peer reaches us.

use crate::{
    id::{Key, NodeId},
    routing::node::NodeHandle,
};
use async_trait::async_trait;
use std::io;
use thiserror::Error;

/// Failure of a single outbound call. Whatever the cause, the engine treats the peer as
/// unreachable for the rest of the current operation.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request timed out")]
    Timeout,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("remote error {code}: {message}")]
    Remote { code: u8, message: String },
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("transport has shut down")]
    Shutdown,
}

/// Reply to `find_value`: the value itself when the peer stores it, its closest known nodes
/// otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FindValueReply {
    Value(Vec<u8>),
    Nodes(Vec<NodeHandle>),
}

/// Outbound remote procedures.
#[async_trait]
pub trait Rpc: Send + Sync + 'static {
    async fn ping(&self, to: &NodeHandle) -> Result<(), RpcError>;

    async fn store(&self, to: &NodeHandle, key: Key, value: Vec<u8>) -> Result<(), RpcError>;

    async fn find_node(&self, to: &NodeHandle, target: NodeId)
        -> Result<Vec<NodeHandle>, RpcError>;

    async fn find_value(&self, to: &NodeHandle, key: Key) -> Result<FindValueReply, RpcError>;
}

/// Inbound remote procedures.
///
/// Handlers may run interleaved with each other and with outbound lookups, so implementations
/// must keep their own state consistent across calls.
pub trait RequestHandler: Send + Sync + 'static {
    fn ping(&self);

    fn store(&self, key: Key, value: Vec<u8>);

    fn find_node(&self, target: NodeId) -> Vec<NodeHandle>;

    fn find_value(&self, key: Key) -> FindValueReply;

    /// Called with the caller of every successfully dispatched request.
    fn on_rpc(&self, caller: NodeHandle);
}
