//! In-memory id index over the message log.

use super::window;
use crate::error::Result;
use crate::types::MessageId;
use parking_lot::RwLock;

/// Maps message ids to log offsets, in commit order.
///
/// Ids are appended strictly increasing, so lookups are binary searches.
#[derive(Default)]
pub struct MessageIndex {
    entries: RwLock<Vec<(MessageId, u64)>>,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries recovered by a log scan.
    pub fn from_entries(entries: Vec<(MessageId, u64)>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Add an entry. `id` must be greater than every id already present.
    pub fn add(&self, id: MessageId, offset: u64) {
        let mut entries = self.entries.write();
        debug_assert!(entries.last().map_or(true, |(last, _)| *last < id));
        entries.push((id, offset));
    }

    /// Get offset for a message id.
    pub fn get_offset(&self, id: MessageId) -> Option<u64> {
        let entries = self.entries.read();
        entries
            .binary_search_by_key(&id, |(id, _)| *id)
            .ok()
            .map(|pos| entries[pos].1)
    }

    /// Offsets of the messages a `query_after` call covers.
    pub fn offsets_after(&self, cursor: Option<MessageId>, limit: Option<usize>) -> Result<Vec<u64>> {
        let entries = self.entries.read();
        Ok(window(entries.as_slice(), |(id, _)| *id, cursor, limit)?
            .iter()
            .map(|(_, offset)| *offset)
            .collect())
    }

    pub fn head(&self) -> Option<MessageId> {
        self.entries.read().last().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let index = MessageIndex::new();
        index.add(MessageId(1), 0);
        index.add(MessageId(2), 120);
        index.add(MessageId(3), 250);

        assert_eq!(index.get_offset(MessageId(2)), Some(120));
        assert_eq!(index.get_offset(MessageId(9)), None);
        assert_eq!(index.head(), Some(MessageId(3)));
    }

    #[test]
    fn test_offsets_after() {
        let index = MessageIndex::from_entries(vec![
            (MessageId(1), 0),
            (MessageId(2), 10),
            (MessageId(3), 20),
            (MessageId(4), 30),
        ]);

        assert_eq!(index.offsets_after(Some(MessageId(2)), None).unwrap(), vec![20, 30]);
        assert_eq!(index.offsets_after(None, Some(1)).unwrap(), vec![30]);
        assert!(index.offsets_after(Some(MessageId(5)), None).is_err());
    }
}
