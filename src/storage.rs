use crate::id::Key;
use std::collections::HashMap;

/// Values stored on this node on behalf of the network.
///
/// There is no expiry and no size limit, entries live until overwritten.
#[derive(Default)]
pub(crate) struct Storage {
    values: HashMap<Key, Vec<u8>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Key) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    /// Insert or overwrite the value under `key`.
    pub fn put(&mut self, key: Key, value: Vec<u8>) {
        self.values.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}
