use crate::{
    config::Config,
    handler::DhtHandler,
    id::{Key, NodeId},
    lookup::{Lookup, LookupOutcome, QueryKind},
    routing::node::NodeHandle,
    rpc::{RequestHandler, Rpc, RpcError},
    socket::{Socket, SocketTrait},
    transport::Transport,
};
use futures_util::future;
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::task::JoinHandle;

/// A Kademlia node.
///
/// This type is cheaply cloneable where each clone refers to the same underlying node. This is
/// useful to be able to issue DHT operations from multiple tasks/threads.
///
/// The node is generic over the [`Rpc`] used to reach remote peers. [`DhtBuilder::start`] creates
/// one that talks to peers over a datagram socket. Use [`Dht::with_rpc`] to plug in a different
/// transport, in which case inbound requests are to be passed to [`Dht::request_handler`].
pub struct Dht<R = Transport> {
    inner: Arc<Inner<R>>,
}

struct Inner<R> {
    config: Config,
    handler: Arc<DhtHandler>,
    rpc: R,
    serve_task: Option<JoinHandle<()>>,
}

impl<R> Drop for Inner<R> {
    fn drop(&mut self) {
        if let Some(task) = &self.serve_task {
            task.abort();
        }
    }
}

impl<R> Clone for Dht<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Dht {
    /// Create a new DhtBuilder.
    pub fn builder() -> DhtBuilder {
        DhtBuilder {
            config: Config::default(),
            nodes: Vec::new(),
        }
    }

    /// Address of the socket this node listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.rpc.local_addr()
    }
}

impl<R: Rpc> Dht<R> {
    /// Node using `rpc` for all outbound requests.
    pub fn with_rpc(config: Config, rpc: R) -> Self {
        let config = config.sanitized();
        let handler = Arc::new(DhtHandler::new(config.node_id, config.k));

        Self::from_parts(config, rpc, handler, None)
    }

    fn from_parts(
        config: Config,
        rpc: R,
        handler: Arc<DhtHandler>,
        serve_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                rpc,
                serve_task,
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.config.node_id
    }

    /// Handlers for the requests other nodes send to this one.
    pub fn request_handler(&self) -> Arc<dyn RequestHandler> {
        self.inner.handler.clone()
    }

    /// Snapshot of the routing table.
    pub fn contacts(&self) -> Vec<NodeHandle> {
        self.inner.handler.contacts()
    }

    /// Join the network through the given already known nodes.
    ///
    /// Asks every known node, all at the same time, for the nodes closest to our own id. Each
    /// node that responds is added to the routing table together with the nodes it returned.
    /// Nodes that fail are logged and skipped. Returns once every request has settled. With no
    /// known nodes this returns immediately and the node starts a network of its own.
    pub async fn start<I>(&self, known_nodes: I)
    where
        I: IntoIterator<Item = NodeHandle>,
    {
        let known_nodes: Vec<_> = known_nodes.into_iter().collect();

        if known_nodes.is_empty() {
            log::info!("No known nodes, starting as the first node of a new network");
            return;
        }

        let this_node_id = self.node_id();
        let results = future::join_all(
            known_nodes
                .iter()
                .map(|node| self.inner.rpc.find_node(node, this_node_id)),
        )
        .await;

        let mut num_joined = 0;

        for (node, result) in known_nodes.iter().zip(results) {
            match result {
                Ok(nodes) => {
                    self.inner.handler.observe(*node);
                    for node in nodes {
                        self.inner.handler.observe(node);
                    }
                    num_joined += 1;
                }
                Err(error) => log::warn!("Failed to bootstrap from {:?}: {}", node, error),
            }
        }

        log::info!(
            "Bootstrap finished: {} of {} known nodes responded, {} contacts",
            num_joined,
            known_nodes.len(),
            self.contacts().len()
        );
    }

    /// Check whether `node` is alive. A node that responds is added to the routing table.
    pub async fn ping(&self, node: &NodeHandle) -> Result<(), RpcError> {
        self.inner.rpc.ping(node).await?;
        self.inner.handler.observe(*node);
        Ok(())
    }

    /// Look up the value stored under `key`. Returns `None` when the lookup converged without any
    /// node returning it.
    pub async fn get(&self, key: Key) -> Option<Vec<u8>> {
        match self.lookup(key, QueryKind::FindValue).await {
            LookupOutcome::ValueFound(value) => Some(value),
            LookupOutcome::Converged(_) => None,
        }
    }

    /// Store `value` under `key` on the `k` known nodes closest to the key.
    ///
    /// Fire and forget: failures are logged and not reported.
    pub async fn set(&self, key: Key, value: Vec<u8>) {
        let nodes = self.inner.handler.closest_nodes(key, self.inner.config.k);

        if nodes.is_empty() {
            log::debug!("No known nodes to store {:?} on", key);
            return;
        }

        let results = future::join_all(
            nodes
                .iter()
                .map(|node| self.inner.rpc.store(node, key, value.clone())),
        )
        .await;

        for (node, result) in nodes.iter().zip(results) {
            if let Err(error) = result {
                log::debug!("Failed to store {:?} on {:?}: {}", key, node, error);
            }
        }
    }

    /// Find the `k` nodes closest to `target`, sorted by distance.
    pub async fn lookup_node(&self, target: NodeId) -> Vec<NodeHandle> {
        match self.lookup(target, QueryKind::FindNode).await {
            LookupOutcome::Converged(nodes) => nodes,
            // `find_node` never returns a value.
            LookupOutcome::ValueFound(_) => Vec::new(),
        }
    }

    async fn lookup(&self, target: NodeId, kind: QueryKind) -> LookupOutcome {
        let config = &self.inner.config;
        let candidates = self.inner.handler.closest_nodes(target, config.k);

        Lookup::new(&self.inner.rpc, config, target, kind)
            .run(candidates)
            .await
    }
}

// ----------------------------------------------------------------------------//

/// Stores information for initializing a DHT node.
#[derive(Debug)]
pub struct DhtBuilder {
    config: Config,
    nodes: Vec<NodeHandle>,
}

impl DhtBuilder {
    /// Add a node to bootstrap from.
    pub fn add_node(mut self, node: NodeHandle) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add nodes. Same as calling `add_node` multiple times but more convenient in some cases.
    pub fn add_nodes<I>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeHandle>,
    {
        self.nodes.extend(nodes);
        self
    }

    /// Set the id of this node. If not provided, a random node id is generated.
    pub fn set_node_id(mut self, id: NodeId) -> Self {
        self.config.node_id = id;
        self
    }

    /// Set the replication factor. Values below 1 are treated as 1.
    pub fn set_k(mut self, k: usize) -> Self {
        self.config.k = k;
        self
    }

    /// Set the number of concurrent requests per lookup. Values below 1 are treated as 1.
    pub fn set_alpha(mut self, alpha: usize) -> Self {
        self.config.alpha = alpha;
        self
    }

    pub fn set_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn set_max_lookup_rounds(mut self, rounds: usize) -> Self {
        self.config.max_lookup_rounds = rounds;
        self
    }

    /// Start a node with the current configuration, bound to the provided socket, and join the
    /// network through the added nodes.
    pub async fn start<S>(self, socket: S) -> io::Result<Dht>
    where
        S: SocketTrait + Send + Sync + 'static,
    {
        let config = self.config.sanitized();
        let transport = Transport::new(
            Socket::new(socket)?,
            config.node_id,
            config.request_timeout,
        );

        let handler = Arc::new(DhtHandler::new(config.node_id, config.k));
        let serve_task = transport.serve(handler.clone());
        let dht = Dht::from_parts(config, transport, handler, Some(serve_task));

        dht.start(self.nodes).await;

        Ok(dht)
    }
}
