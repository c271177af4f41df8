use std::slice::Iter;

use crate::routing::node::Node;
#[cfg(test)]
use crate::routing::node::NodeStatus;

/// Bucket containing Nodes with identical bit prefixes.
pub struct Bucket {
    nodes: Vec<Node>,
    capacity: usize,
}

impl Bucket {
    /// Create a new empty Bucket holding at most `capacity` nodes.
    pub fn new(capacity: usize) -> Bucket {
        Bucket {
            nodes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Iterator over each node within the bucket.
    pub fn iter(&self) -> Iter<Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.capacity
    }

    /// Attempt to add the given Node to the bucket.
    ///
    /// Returns false if the Node could not be placed in the bucket because it is full.
    pub fn add_node(&mut self, new_node: Node) -> bool {
        // Already known, just refresh it.
        if let Some(node) = self.nodes.iter_mut().find(|node| **node == new_node) {
            node.refresh(new_node);
            return true;
        }

        if !self.is_full() {
            self.nodes.push(new_node);
            return true;
        }

        // Replace the stalest node with a lower status. Nodes of equal status are kept since
        // longer lasting nodes are preferred.
        let new_node_status = new_node.status();
        let replace_index = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.status() < new_node_status)
            .min_by_key(|(_, node)| node.last_seen())
            .map(|(index, _)| index);

        if let Some(index) = replace_index {
            self.nodes[index] = new_node;
            true
        } else {
            false
        }
    }

    /// Iterator over all good nodes in the bucket.
    #[cfg(test)]
    fn good_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| node.status() == NodeStatus::Good)
    }
}

#[cfg(test)]
mod tests {
    use crate::routing::bucket::Bucket;
    use crate::routing::node::{Node, NodeStatus};
    use crate::test;

    const CAPACITY: usize = 8;

    #[test]
    fn positive_initial_no_nodes() {
        let bucket = Bucket::new(CAPACITY);

        assert_eq!(bucket.good_nodes().count(), 0);
        assert_eq!(bucket.len(), 0);
    }

    #[test]
    fn positive_all_good_nodes() {
        let mut bucket = Bucket::new(CAPACITY);

        for handle in test::dummy_block_handles(CAPACITY as u8) {
            assert!(bucket.add_node(Node::as_good(handle)));
        }

        assert_eq!(bucket.good_nodes().count(), CAPACITY);
        assert!(bucket.is_full());
    }

    #[test]
    fn positive_readd_does_not_duplicate() {
        let mut bucket = Bucket::new(CAPACITY);
        let handle = test::dummy_handle(1);

        bucket.add_node(Node::as_good(handle));
        bucket.add_node(Node::as_good(handle));

        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn positive_replace_questionable_node() {
        let mut bucket = Bucket::new(CAPACITY);

        let handles = test::dummy_block_handles(CAPACITY as u8 + 1);
        for handle in &handles[..CAPACITY] {
            bucket.add_node(Node::as_questionable(*handle));
        }

        assert_eq!(bucket.good_nodes().count(), 0);

        let good_node = Node::as_good(handles[CAPACITY]);
        assert!(bucket.add_node(good_node.clone()));

        assert_eq!(bucket.good_nodes().next(), Some(&good_node));
        assert_eq!(bucket.len(), CAPACITY);
    }

    #[test]
    fn positive_resist_good_node_churn() {
        let mut bucket = Bucket::new(CAPACITY);

        let handles = test::dummy_block_handles(CAPACITY as u8 + 1);
        for handle in &handles[..CAPACITY] {
            bucket.add_node(Node::as_good(*handle));
        }

        let new_good_node = Node::as_good(handles[CAPACITY]);

        assert!(!bucket.add_node(new_good_node.clone()));
        assert!(!bucket.iter().any(|node| &new_good_node == node));
    }

    #[test]
    fn positive_resist_questionable_node_churn() {
        let mut bucket = Bucket::new(CAPACITY);

        let handles = test::dummy_block_handles(CAPACITY as u8 + 1);
        for handle in &handles[..CAPACITY] {
            bucket.add_node(Node::as_questionable(*handle));
        }

        let new_questionable_node = Node::as_questionable(handles[CAPACITY]);
        bucket.add_node(new_questionable_node.clone());

        assert!(!bucket.iter().any(|node| &new_questionable_node == node));
        assert_eq!(
            bucket
                .iter()
                .filter(|node| node.status() == NodeStatus::Questionable)
                .count(),
            CAPACITY
        );
    }
}
