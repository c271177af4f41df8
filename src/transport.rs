//! Request/response transport over a datagram socket.
//!
//! Outgoing requests are tagged with a transaction id and matched against incoming responses.
//! A request that gets no response within the configured timeout fails with
//! [`RpcError::Timeout`]. Incoming requests are dispatched to a [`RequestHandler`].

use crate::{
    id::{Key, NodeId},
    message::{
        FindNodeRequest, FindValueRequest, Message, MessageBody, OtherResponse, PingRequest,
        Request, Response, StoreRequest, ValueResponse,
    },
    routing::node::NodeHandle,
    rpc::{FindValueReply, RequestHandler, Rpc, RpcError},
    socket::Socket,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::{
    sync::oneshot,
    task::{self, JoinHandle},
    time,
};

type TransactionId = [u8; 2];

/// Pause after a failed receive.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// The receive loop stops after this many failed receives in a row.
const MAX_RECV_ERRORS: u32 = 10;

/// Cheaply cloneable handle to the socket and the table of in-flight requests.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    socket: Socket,
    this_node_id: NodeId,
    request_timeout: Duration,
    next_transaction_id: AtomicU16,
    pending: Mutex<HashMap<TransactionId, oneshot::Sender<MessageBody>>>,
}

impl Transport {
    pub(crate) fn new(socket: Socket, this_node_id: NodeId, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                socket,
                this_node_id,
                request_timeout,
                next_transaction_id: AtomicU16::new(rand::random()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.socket.local_addr()
    }

    /// Spawn the receive loop. Requests are answered through `handler`, responses are routed to
    /// the pending requests they belong to.
    pub(crate) fn serve<H: RequestHandler>(&self, handler: Arc<H>) -> JoinHandle<()> {
        task::spawn(self.clone().run(handler))
    }

    async fn run<H: RequestHandler>(self, handler: Arc<H>) {
        let mut num_errors = 0;

        loop {
            match self.inner.socket.recv().await {
                Ok((message, addr)) => {
                    num_errors = 0;
                    self.handle_incoming(&*handler, message, addr).await;
                }
                Err(error) => {
                    num_errors += 1;

                    if num_errors >= MAX_RECV_ERRORS {
                        log::error!("Socket keeps failing, stopping the receive loop: {error}");
                        break;
                    }

                    log::warn!("Failed to receive incoming message: {error}");
                    time::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_incoming<H: RequestHandler>(
        &self,
        handler: &H,
        message: Message,
        addr: SocketAddr,
    ) {
        log::trace!("Received from {addr:?} {message:?}");

        match message.body {
            MessageBody::Request(request) => {
                let caller = NodeHandle::new(request.sender_id(), addr);
                let method = request.method();
                let response = dispatch(handler, self.inner.this_node_id, request);

                let reply = Message {
                    transaction_id: message.transaction_id,
                    body: MessageBody::Response(response),
                };

                if let Err(error) = self.inner.socket.send(&reply, addr).await {
                    log::debug!("Failed to send {method} response to {addr:?}: {error}");
                }

                handler.on_rpc(caller);
            }
            body @ (MessageBody::Response(_) | MessageBody::Error(_)) => {
                let transaction_id: Option<TransactionId> =
                    message.transaction_id.as_slice().try_into().ok();
                let tx = transaction_id.and_then(|tid| self.inner.pending().remove(&tid));

                match tx {
                    Some(tx) => {
                        // The requester may have given up already.
                        tx.send(body).unwrap_or(());
                    }
                    None => log::debug!("Dropping unsolicited message from {addr:?}"),
                }
            }
        }
    }

    async fn request(&self, to: SocketAddr, request: Request) -> Result<Response, RpcError> {
        let (tx, rx) = oneshot::channel();
        let pending = self.inner.register(tx);

        let message = Message {
            transaction_id: pending.transaction_id.to_vec(),
            body: MessageBody::Request(request),
        };

        self.inner.socket.send(&message, to).await?;

        match time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(MessageBody::Response(response))) => Ok(response),
            Ok(Ok(MessageBody::Error(error))) => Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            }),
            Ok(Ok(MessageBody::Request(_))) => Err(RpcError::UnexpectedResponse),
            Ok(Err(_)) => Err(RpcError::Shutdown),
            Err(_) => Err(RpcError::Timeout),
        }
    }

    /// Keep only the nodes we can reach from our socket.
    fn reachable(&self, nodes: Vec<NodeHandle>) -> Vec<NodeHandle> {
        let ipv4 = self.local_addr().is_ipv4();
        nodes
            .into_iter()
            .filter(|node| node.addr.is_ipv4() == ipv4)
            .collect()
    }

    #[cfg(test)]
    fn num_pending(&self) -> usize {
        self.inner.pending().len()
    }
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<TransactionId, oneshot::Sender<MessageBody>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, tx: oneshot::Sender<MessageBody>) -> PendingRequest<'_> {
        let mut pending = self.pending();

        let transaction_id = loop {
            let tid = self
                .next_transaction_id
                .fetch_add(1, Ordering::Relaxed)
                .to_be_bytes();

            if !pending.contains_key(&tid) {
                break tid;
            }
        };

        pending.insert(transaction_id, tx);

        PendingRequest {
            inner: self,
            transaction_id,
        }
    }
}

/// Removes the transaction from the pending table when the request completes, times out or is
/// cancelled.
struct PendingRequest<'a> {
    inner: &'a Inner,
    transaction_id: TransactionId,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.inner.pending().remove(&self.transaction_id);
    }
}

fn dispatch<H: RequestHandler + ?Sized>(
    handler: &H,
    this_node_id: NodeId,
    request: Request,
) -> Response {
    match request {
        Request::Ping(_) => {
            handler.ping();
            Response::Other(OtherResponse::ack(this_node_id))
        }
        Request::Store(StoreRequest { key, value, .. }) => {
            handler.store(key, value);
            Response::Other(OtherResponse::ack(this_node_id))
        }
        Request::FindNode(FindNodeRequest { target, .. }) => Response::Other(
            OtherResponse::with_nodes(this_node_id, handler.find_node(target)),
        ),
        Request::FindValue(FindValueRequest { key, .. }) => match handler.find_value(key) {
            FindValueReply::Value(value) => Response::Value(ValueResponse {
                id: this_node_id,
                value,
            }),
            FindValueReply::Nodes(nodes) => {
                Response::Other(OtherResponse::with_nodes(this_node_id, nodes))
            }
        },
    }
}

#[async_trait]
impl Rpc for Transport {
    async fn ping(&self, to: &NodeHandle) -> Result<(), RpcError> {
        let request = Request::Ping(PingRequest {
            id: self.inner.this_node_id,
        });

        self.request(to.addr, request).await.map(|_| ())
    }

    async fn store(&self, to: &NodeHandle, key: Key, value: Vec<u8>) -> Result<(), RpcError> {
        let request = Request::Store(StoreRequest {
            id: self.inner.this_node_id,
            key,
            value,
        });

        match self.request(to.addr, request).await? {
            Response::Other(_) => Ok(()),
            Response::Value(_) => Err(RpcError::UnexpectedResponse),
        }
    }

    async fn find_node(
        &self,
        to: &NodeHandle,
        target: NodeId,
    ) -> Result<Vec<NodeHandle>, RpcError> {
        let request = Request::FindNode(FindNodeRequest {
            id: self.inner.this_node_id,
            target,
        });

        match self.request(to.addr, request).await? {
            Response::Other(response) => Ok(self.reachable(response.into_nodes())),
            Response::Value(_) => Err(RpcError::UnexpectedResponse),
        }
    }

    async fn find_value(&self, to: &NodeHandle, key: Key) -> Result<FindValueReply, RpcError> {
        let request = Request::FindValue(FindValueRequest {
            id: self.inner.this_node_id,
            key,
        });

        match self.request(to.addr, request).await? {
            Response::Value(response) => Ok(FindValueReply::Value(response.value)),
            Response::Other(response) => Ok(FindValueReply::Nodes(
                self.reachable(response.into_nodes()),
            )),
        }
    }
}
