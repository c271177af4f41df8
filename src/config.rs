use crate::id::NodeId;
use std::time::Duration;

/// Default replication factor and lookup width (Kademlia `k`).
pub const DEFAULT_K: usize = 20;
/// Default number of concurrent requests per lookup (Kademlia `α`).
pub const DEFAULT_ALPHA: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound on the rounds of a single lookup, in case it keeps finding "new" but useless
/// contacts.
pub const DEFAULT_MAX_LOOKUP_ROUNDS: usize = 64;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Our own id.
    pub node_id: NodeId,
    /// Replication factor: how many nodes a value is stored on and how many nodes a lookup
    /// converges to.
    pub k: usize,
    /// Maximum number of requests one lookup has in flight at the same time.
    pub alpha: usize,
    /// How long to wait for a response before a peer is considered unreachable.
    pub request_timeout: Duration,
    pub max_lookup_rounds: usize,
}

impl Config {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_lookup_rounds: DEFAULT_MAX_LOOKUP_ROUNDS,
        }
    }

    /// Copy of this config with every count at least 1.
    pub(crate) fn sanitized(mut self) -> Self {
        self.k = self.k.max(1);
        self.alpha = self.alpha.max(1);
        self.max_lookup_rounds = self.max_lookup_rounds.max(1);
        self
    }
}

impl Default for Config {
    /// Defaults with a random node id.
    fn default() -> Self {
        Self::new(rand::random())
    }
}
