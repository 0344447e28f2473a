use std::collections::HashMap;
use std::sync::Arc;

/// An embedding accepted for a user but not yet folded into a snapshot.
#[derive(Debug, Clone)]
pub struct StagingEntry {
    pub user_id: String,
    pub embedding: Arc<[f32]>,
    /// Monotonic stamp; a rebuild only clears entries whose stamp it saw.
    pub(crate) seq: u64,
}

/// StagingSet holds at most one pending embedding per user_id.
///
/// Not synchronized; [`crate::VectorIndex`] guards it with a mutex.
#[derive(Debug, Default)]
pub struct StagingSet {
    entries: HashMap<String, StagingEntry>,
    next_seq: u64,
}

impl StagingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the pending embedding for `user_id`.
    /// Returns true if an earlier pending embedding was replaced.
    pub fn upsert(&mut self, user_id: &str, embedding: &[f32]) -> bool {
        self.next_seq += 1;
        let entry = StagingEntry {
            user_id: user_id.to_string(),
            embedding: Arc::from(embedding),
            seq: self.next_seq,
        };
        self.entries.insert(user_id.to_string(), entry).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<&StagingEntry> {
        self.entries.get(user_id)
    }

    /// Point-in-time copy of every entry, sorted by user_id. Embeddings are
    /// shared, not copied.
    pub fn entries(&self) -> Vec<StagingEntry> {
        let mut out: Vec<StagingEntry> = self.entries.values().cloned().collect();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }

    /// Remove the given entries, but only where the stored entry is still the
    /// one that was copied. Entries restaged since the copy are kept.
    /// Returns the number removed.
    pub fn remove_folded<'a>(&mut self, folded: impl IntoIterator<Item = &'a StagingEntry>) -> usize {
        let mut removed = 0;
        for f in folded {
            if self.entries.get(&f.user_id).is_some_and(|cur| cur.seq == f.seq) {
                self.entries.remove(&f.user_id);
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces() {
        let mut s = StagingSet::new();
        assert!(!s.upsert("alice", &[1.0, 0.0]));
        assert!(s.upsert("alice", &[0.0, 1.0]));
        assert!(!s.upsert("bob", &[1.0, 1.0]));

        assert_eq!(s.len(), 2);
        assert_eq!(&*s.get("alice").unwrap().embedding, &[0.0, 1.0]);
    }

    #[test]
    fn test_entries_sorted() {
        let mut s = StagingSet::new();
        s.upsert("carol", &[1.0]);
        s.upsert("alice", &[1.0]);
        s.upsert("bob", &[1.0]);
        let ids: Vec<String> = s.entries().into_iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_remove_folded_keeps_restaged() {
        let mut s = StagingSet::new();
        s.upsert("alice", &[1.0, 0.0]);
        s.upsert("bob", &[0.0, 1.0]);
        let copied = s.entries();

        // alice re-enrolls while the copy is being folded.
        s.upsert("alice", &[0.5, 0.5]);

        assert_eq!(s.remove_folded(&copied), 1);
        assert!(s.contains("alice"));
        assert!(!s.contains("bob"));
        assert_eq!(&*s.get("alice").unwrap().embedding, &[0.5, 0.5]);
    }
}
