use crate::{
    id::{Key, NodeId},
    routing::{node::NodeHandle, table::RoutingTable},
    rpc::{FindValueReply, RequestHandler},
    storage::Storage,
};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// State shared between the inbound request handlers and the outbound lookups of one node: the
/// routing table and the local store.
pub(crate) struct DhtHandler {
    k: usize,
    routing_table: Mutex<RoutingTable>,
    storage: Mutex<Storage>,
}

impl DhtHandler {
    pub fn new(this_node_id: NodeId, k: usize) -> Self {
        Self {
            k,
            routing_table: Mutex::new(RoutingTable::new(this_node_id, k)),
            storage: Mutex::new(Storage::new()),
        }
    }

    /// Up to `count` known nodes closest to `target`.
    pub fn closest_nodes(&self, target: NodeId, count: usize) -> Vec<NodeHandle> {
        self.routing_table().closest_nodes(target, count)
    }

    /// Add or refresh a contact in the routing table.
    pub fn observe(&self, node: NodeHandle) {
        self.routing_table().observe(node)
    }

    /// All contacts currently in the routing table.
    pub fn contacts(&self) -> Vec<NodeHandle> {
        self.routing_table()
            .iter()
            .map(|node| *node.handle())
            .collect()
    }

    #[cfg(test)]
    pub fn num_stored(&self) -> usize {
        self.storage().len()
    }

    // The guarded data stays consistent even if a holder panicked, so a poisoned lock is still
    // usable.
    fn routing_table(&self) -> MutexGuard<'_, RoutingTable> {
        self.routing_table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RequestHandler for DhtHandler {
    fn ping(&self) {}

    fn store(&self, key: Key, value: Vec<u8>) {
        log::debug!("Storing {} bytes under {:?}", value.len(), key);
        self.storage().put(key, value);
    }

    fn find_node(&self, target: NodeId) -> Vec<NodeHandle> {
        self.closest_nodes(target, self.k)
    }

    fn find_value(&self, key: Key) -> FindValueReply {
        if let Some(value) = self.storage().get(&key) {
            return FindValueReply::Value(value.to_vec());
        }

        FindValueReply::Nodes(self.find_node(key))
    }

    fn on_rpc(&self, caller: NodeHandle) {
        self.observe(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn find_value_returns_stored_value() {
        let handler = DhtHandler::new(test::dummy_node_id(0), 20);
        let key = test::dummy_node_id(9);

        handler.store(key, b"hello".to_vec());

        assert_eq!(
            handler.find_value(key),
            FindValueReply::Value(b"hello".to_vec())
        );
    }

    #[test]
    fn find_value_falls_back_to_nodes() {
        let handler = DhtHandler::new(test::dummy_node_id(0), 20);
        handler.on_rpc(test::dummy_handle(1));
        handler.on_rpc(test::dummy_handle(2));

        let key = test::dummy_node_id(2);
        let reply = handler.find_value(key);

        assert_eq!(reply, FindValueReply::Nodes(handler.find_node(key)));
        assert_eq!(
            reply,
            FindValueReply::Nodes(vec![test::dummy_handle(2), test::dummy_handle(1)])
        );
    }

    #[test]
    fn find_node_limited_to_k() {
        let handler = DhtHandler::new(test::dummy_node_id(0), 3);
        for handle in test::dummy_block_handles(10) {
            handler.on_rpc(handle);
        }

        assert_eq!(handler.find_node(test::dummy_node_id(5)).len(), 3);
    }

    #[test]
    fn find_node_on_empty_table() {
        let handler = DhtHandler::new(test::dummy_node_id(0), 20);

        assert!(handler.find_node(test::dummy_node_id(5)).is_empty());
    }

    #[test]
    fn on_rpc_records_caller() {
        let handler = DhtHandler::new(test::dummy_node_id(0), 20);

        handler.ping();
        handler.on_rpc(test::dummy_handle(4));

        assert_eq!(handler.contacts(), vec![test::dummy_handle(4)]);
    }

    #[test]
    fn on_rpc_ignores_own_id() {
        let handler = DhtHandler::new(test::dummy_node_id(0), 20);

        handler.on_rpc(test::dummy_handle(0));

        assert!(handler.contacts().is_empty());
    }
}
