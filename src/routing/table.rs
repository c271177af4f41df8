use super::{
    bucket::Bucket,
    node::{self, Node, NodeHandle},
};
use crate::id::{NodeId, ID_LEN};

pub const MAX_BUCKETS: usize = ID_LEN * 8;

/// Routing table containing a table of routing nodes as well
/// as the id of the local node participating in the dht.
pub struct RoutingTable {
    // Important: Our node id will always fall within the range
    // of the last bucket in the buckets array.
    buckets: Vec<Bucket>,
    node_id: NodeId,
    bucket_size: usize,
}

impl RoutingTable {
    /// Create a new RoutingTable with the given node id as our id and buckets holding up to
    /// `bucket_size` nodes each.
    pub fn new(node_id: NodeId, bucket_size: usize) -> RoutingTable {
        let bucket_size = bucket_size.max(1);
        let buckets = vec![Bucket::new(bucket_size)];

        RoutingTable {
            buckets,
            node_id,
            bucket_size,
        }
    }

    /// Up to `count` known nodes, ordered by ascending distance to `target`.
    pub fn closest_nodes(&self, target: NodeId, count: usize) -> Vec<NodeHandle> {
        let mut nodes: Vec<_> = self.iter().map(|node| *node.handle()).collect();
        node::sort_by_distance(&mut nodes, target);
        nodes.truncate(count);
        nodes
    }

    /// Record that we heard from `handle`. Inserts it if there is room, refreshes it otherwise.
    pub fn observe(&mut self, handle: NodeHandle) {
        self.add_node(Node::as_good(handle));
    }

    /// Number of nodes in the RoutingTable.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterator over all buckets in the routing table.
    #[cfg(test)]
    pub fn buckets(&self) -> impl ExactSizeIterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Iterator over every node in the routing table.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.buckets.iter().flat_map(Bucket::iter)
    }

    /// Find an instance of the target node in the RoutingTable, if it exists.
    #[cfg(test)]
    pub fn find_node(&self, id: NodeId) -> Option<&Node> {
        let bucket_index = bucket_placement(leading_bit_count(self.node_id, id), self.buckets.len());
        self.buckets.get(bucket_index)?.iter().find(|n| n.id() == id)
    }

    /// Add the node to the RoutingTable if there is space for it.
    pub fn add_node(&mut self, node: Node) {
        let num_same_bits = leading_bit_count(self.node_id, node.id());

        // Should not add a node that has the same id as us
        if num_same_bits != MAX_BUCKETS {
            self.bucket_node(node, num_same_bits);
        }
    }

    /// Recursively tries to place the node into some bucket.
    fn bucket_node(&mut self, node: Node, num_same_bits: usize) {
        let bucket_index = bucket_placement(num_same_bits, self.buckets.len());

        // Try to place in correct bucket
        if !self.buckets[bucket_index].add_node(node.clone()) {
            // Bucket was full, try to split it
            if self.split_bucket(bucket_index) {
                // Bucket split successfully, try to add again
                self.bucket_node(node, num_same_bits);
            } else {
                log::trace!("Routing table bucket {bucket_index} full, dropping {node:?}");
            }
        }
    }

    /// Tries to split the bucket at the specified index.
    ///
    /// Returns false if the split cannot be performed.
    fn split_bucket(&mut self, bucket_index: usize) -> bool {
        if !can_split_bucket(self.buckets.len(), bucket_index) {
            return false;
        }

        // Remove the whole last bucket and redistribute its nodes between two fresh ones.
        let split_bucket = match self.buckets.pop() {
            Some(bucket) => bucket,
            None => return false,
        };

        self.buckets.push(Bucket::new(self.bucket_size));
        self.buckets.push(Bucket::new(self.bucket_size));

        for node in split_bucket.iter() {
            self.add_node(node.clone());
        }

        true
    }
}

/// Returns true if the bucket can be split.
fn can_split_bucket(num_buckets: usize, bucket_index: usize) -> bool {
    bucket_index == num_buckets - 1 && bucket_index != MAX_BUCKETS - 1
}

/// Number of leading bits that are identical between the local and remote node ids.
pub fn leading_bit_count(local_node: NodeId, remote_node: NodeId) -> usize {
    (local_node ^ remote_node).leading_zeros() as usize
}

/// Take the number of leading bits that are the same between our node and the remote
/// node and calculate a bucket index for that node id.
fn bucket_placement(num_same_bits: usize, num_buckets: usize) -> usize {
    // The index that the node should be placed in *eventually*, meaning
    // when we create enough buckets for that bucket to appear.
    let ideal_index = num_same_bits;

    if ideal_index >= num_buckets {
        num_buckets - 1
    } else {
        ideal_index
    }
}

#[cfg(test)]
mod tests {
    use crate::id::{NodeId, ID_LEN};
    use crate::routing::node::{Node, NodeHandle};
    use crate::routing::table::{self, RoutingTable};
    use crate::test;

    const BUCKET_SIZE: usize = 8;

    #[test]
    fn positive_add_node_max_recursion() {
        let table_id = [1u8; ID_LEN];
        let mut table = RoutingTable::new(table_id.into(), BUCKET_SIZE);

        let mut node_id = table_id;
        // Modify the id so it is placed in the last bucket
        node_id[ID_LEN - 1] = 0;

        // Trigger a bucket overflow and since the ids are placed in the last bucket, all of
        // the buckets will be recursively created and inserted into the list of all buckets.
        for (index, addr) in test::dummy_block_socket_addrs(BUCKET_SIZE as u16 + 1)
            .into_iter()
            .enumerate()
        {
            let mut id = node_id;
            id[ID_LEN - 2] = index as u8;
            table.add_node(Node::as_good(NodeHandle::new(id.into(), addr)));
        }

        assert!(table.buckets().count() > 1);
    }

    #[test]
    fn positive_initial_empty_buckets() {
        let table = RoutingTable::new([1u8; ID_LEN].into(), BUCKET_SIZE);

        assert_eq!(table.buckets().count(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn positive_all_sorted_buckets() {
        let table_id = NodeId::from([1u8; ID_LEN]);
        let mut table = RoutingTable::new(table_id, 1);

        let addr = test::dummy_socket_addr_v4();
        for bit_flip_index in 0..table::MAX_BUCKETS {
            let bucket_node_id = table_id.flip_bit(bit_flip_index);
            table.observe(NodeHandle::new(bucket_node_id, addr));
        }

        assert_eq!(table.buckets().count(), table::MAX_BUCKETS);
        for bucket in table.buckets() {
            assert_eq!(bucket.len(), 1)
        }
    }

    #[test]
    fn negative_node_id_equal_table_id() {
        let table_id = [1u8; ID_LEN];
        let mut table = RoutingTable::new(table_id.into(), BUCKET_SIZE);

        table.observe(NodeHandle::new(table_id.into(), test::dummy_socket_addr_v4()));

        assert!(table.is_empty());
        assert!(table.closest_nodes(table_id.into(), 20).is_empty());
    }

    #[test]
    fn observe_is_idempotent() {
        let mut table = RoutingTable::new(test::dummy_node_id(0), BUCKET_SIZE);
        let handle = test::dummy_handle(5);

        table.observe(handle);
        table.observe(handle);

        assert_eq!(table.len(), 1);
        assert!(table.find_node(handle.id).is_some());
    }

    #[test]
    fn closest_nodes_sorted_and_limited() {
        let mut table = RoutingTable::new(test::dummy_node_id(0), BUCKET_SIZE);
        for handle in test::dummy_block_handles(6) {
            table.observe(handle);
        }

        let target = test::dummy_node_id(4);
        let closest = table.closest_nodes(target, 3);

        assert_eq!(closest.len(), 3);
        assert_eq!(closest[0].id, target);
        assert!(closest
            .windows(2)
            .all(|w| target.cmp_distance(&w[0].id, &w[1].id).is_le()));
    }

    #[test]
    fn closest_nodes_sparse_table_returns_fewer() {
        let mut table = RoutingTable::new(test::dummy_node_id(0), BUCKET_SIZE);
        table.observe(test::dummy_handle(1));

        assert_eq!(table.closest_nodes(test::dummy_node_id(9), 20).len(), 1);
    }
}
