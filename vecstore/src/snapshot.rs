use std::collections::HashMap;

use crate::error::VecError;
use crate::hnsw::{Hnsw, HnswConfig};

/// A borrowed view of one entry of an [`IndexSnapshot`].
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry<'a> {
    /// Position of the entry inside its snapshot. Only unique within one
    /// generation.
    pub index_id: u32,
    pub user_id: &'a str,
    pub embedding: &'a [f32],
}

/// A nearest-neighbor hit returned by [`IndexSnapshot::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotHit {
    pub index_id: u32,
    pub user_id: String,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub similarity: f32,
}

/// IndexSnapshot is one immutable, fully built generation of the index.
///
/// index_ids are assigned sequentially from 0 in the order entries are
/// passed to [`IndexSnapshot::build`].
pub struct IndexSnapshot {
    generation: u64,
    graph: Hnsw,
    user_ids: Vec<String>,
    by_user: HashMap<String, u32>,
}

impl IndexSnapshot {
    /// The generation-0 snapshot with no entries.
    pub fn empty(cfg: HnswConfig) -> Self {
        Self {
            generation: 0,
            graph: Hnsw::empty(cfg),
            user_ids: Vec::new(),
            by_user: HashMap::new(),
        }
    }

    /// Build a snapshot over `(user_id, embedding)` pairs. user_ids must be
    /// unique; a later duplicate would shadow the earlier one in lookups.
    pub fn build(
        generation: u64,
        cfg: HnswConfig,
        entries: Vec<(String, Vec<f32>)>,
    ) -> Result<Self, VecError> {
        let (user_ids, vectors): (Vec<String>, Vec<Vec<f32>>) = entries.into_iter().unzip();
        let graph = Hnsw::build(cfg, vectors)?;
        Ok(Self::from_parts(generation, graph, user_ids))
    }

    pub(crate) fn from_parts(generation: u64, graph: Hnsw, user_ids: Vec<String>) -> Self {
        debug_assert_eq!(graph.len(), user_ids.len());
        let by_user = user_ids
            .iter()
            .enumerate()
            .map(|(i, u)| (u.clone(), i as u32))
            .collect();
        Self {
            generation,
            graph,
            user_ids,
            by_user,
        }
    }

    pub(crate) fn graph(&self) -> &Hnsw {
        &self.graph
    }

    pub(crate) fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &HnswConfig {
        self.graph.config()
    }

    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// Current index_id of `user_id`'s embedding in this generation.
    pub fn index_id_of(&self, user_id: &str) -> Option<u32> {
        self.by_user.get(user_id).copied()
    }

    pub fn get(&self, index_id: u32) -> Option<IndexEntry<'_>> {
        let user_id = self.user_ids.get(index_id as usize)?;
        let embedding = self.graph.vector(index_id)?;
        Some(IndexEntry {
            index_id,
            user_id,
            embedding,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = IndexEntry<'_>> + '_ {
        (0..self.user_ids.len() as u32).filter_map(|id| self.get(id))
    }

    /// Approximate top-k search, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SnapshotHit>, VecError> {
        let neighbors = self.graph.search(query, top_k)?;
        Ok(neighbors
            .into_iter()
            .map(|n| SnapshotHit {
                index_id: n.id,
                user_id: self.user_ids[n.id as usize].clone(),
                similarity: 1.0 - n.distance,
            })
            .collect())
    }
}

impl std::fmt::Debug for IndexSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSnapshot")
            .field("generation", &self.generation)
            .field("len", &self.user_ids.len())
            .field("dim", &self.graph.config().dim)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> HnswConfig {
        HnswConfig {
            dim: 3,
            m: 8,
            ef_construction: 32,
            ef_search: 16,
            seed: 3,
        }
    }

    #[test]
    fn test_sequential_ids() {
        let snap = IndexSnapshot::build(
            4,
            cfg(),
            vec![
                ("bob".into(), vec![0.0, 1.0, 0.0]),
                ("alice".into(), vec![1.0, 0.0, 0.0]),
            ],
        )
        .unwrap();

        assert_eq!(snap.generation(), 4);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.index_id_of("bob"), Some(0));
        assert_eq!(snap.index_id_of("alice"), Some(1));
        assert_eq!(snap.index_id_of("carol"), None);

        let e = snap.get(1).unwrap();
        assert_eq!(e.user_id, "alice");
        assert_eq!(e.embedding, &[1.0, 0.0, 0.0]);
        assert!(snap.get(2).is_none());
    }

    #[test]
    fn test_search_reports_similarity() {
        let snap = IndexSnapshot::build(
            1,
            cfg(),
            vec![
                ("a".into(), vec![1.0, 0.0, 0.0]),
                ("b".into(), vec![0.0, 1.0, 0.0]),
            ],
        )
        .unwrap();

        let hits = snap.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].user_id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits[1].similarity.abs() < 1e-6);
    }

    #[test]
    fn test_empty() {
        let snap = IndexSnapshot::empty(cfg());
        assert_eq!(snap.generation(), 0);
        assert!(snap.is_empty());
        assert_eq!(snap.iter().count(), 0);
        assert!(snap.search(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());
    }
}
