use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::id::NodeId;

/// Maximum wait period before a node becomes questionable.
const MAX_LAST_SEEN_MINS: u64 = 15;

/// Status of the node.
/// Ordering of the enumerations is important, variants higher
/// up are considered to be less than those further down.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Ord, PartialOrd)]
pub enum NodeStatus {
    Questionable,
    Good,
}

/// Node id + its socket address.
///
/// Two handles are equal when their ids are equal. Which address wins when a node shows up under
/// a new one is decided by the routing table.
#[derive(Copy, Clone)]
pub struct NodeHandle {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl NodeHandle {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeHandle {}

impl Hash for NodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for NodeHandle {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}@{}", self.id, self.addr)
    }
}

/// Sort `nodes` by ascending XOR distance to `target`.
pub fn sort_by_distance(nodes: &mut [NodeHandle], target: NodeId) {
    nodes.sort_by(|a, b| target.cmp_distance(&a.id, &b.id));
}

/// Contact entry held in the routing table.
#[derive(Clone)]
pub struct Node {
    handle: NodeHandle,
    last_seen: Instant,
}

impl Node {
    /// Create a node that we have just heard from.
    pub fn as_good(handle: NodeHandle) -> Node {
        Node {
            handle,
            last_seen: Instant::now(),
        }
    }

    /// Create a node that we have not heard from in a while.
    #[cfg(test)]
    pub fn as_questionable(handle: NodeHandle) -> Node {
        let offset = Duration::from_secs(MAX_LAST_SEEN_MINS * 60);
        let last_seen = Instant::now()
            .checked_sub(offset)
            .unwrap_or_else(Instant::now);

        Node { handle, last_seen }
    }

    /// Record that we heard from the node again. Picks up its latest address.
    pub fn refresh(&mut self, other: Node) {
        self.handle.addr = other.handle.addr;
        self.last_seen = self.last_seen.max(other.last_seen);
    }

    pub fn id(&self) -> NodeId {
        self.handle.id
    }

    #[cfg(test)]
    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }

    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Current status of the node.
    pub fn status(&self) -> NodeStatus {
        let max_last_seen = Duration::from_secs(MAX_LAST_SEEN_MINS * 60);

        if self.last_seen.elapsed() < max_last_seen {
            NodeStatus::Good
        } else {
            NodeStatus::Questionable
        }
    }
}

impl Eq for Node {}

impl PartialEq<Node> for Node {
    fn eq(&self, other: &Node) -> bool {
        self.handle == other.handle
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Node")
            .field("id", &self.handle.id)
            .field("addr", &self.handle.addr)
            .field("last_seen", &self.last_seen)
            .finish()
    }
}
