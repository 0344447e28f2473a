use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cosine::cosine_similarity;
use crate::error::VecError;
use crate::hnsw::HnswConfig;
use crate::snapshot::IndexSnapshot;
use crate::staging::{StagingEntry, StagingSet};

/// One result of [`VectorIndex::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub user_id: String,
    /// index_id in the snapshot the query ran against, or `None` when the
    /// hit came from the staging set.
    pub index_id: Option<u32>,
    /// Generation of the snapshot `index_id` belongs to.
    pub generation: u64,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

impl QueryHit {
    pub fn is_staged(&self) -> bool {
        self.index_id.is_none()
    }
}

/// A user_id → index_id pairing that changed in a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceAssignment {
    pub user_id: String,
    pub index_id: u32,
}

/// Summary of a rebuild that swapped in a new snapshot.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub generation: u64,
    pub previous_generation: u64,
    /// Entries in the new snapshot.
    pub indexed: usize,
    /// user_ids whose staged embedding was folded in.
    pub folded: Vec<String>,
    /// Every user whose index_id is new or differs from the previous
    /// generation.
    pub assignments: Vec<FaceAssignment>,
    /// Staged entries discarded for having the wrong dimension.
    pub dropped: Vec<String>,
    pub elapsed: Duration,
}

impl RebuildReport {
    /// The partial failure for dropped entries, if there were any.
    pub fn aborted(&self) -> Option<VecError> {
        aborted_error(&self.dropped)
    }
}

fn aborted_error(dropped: &[String]) -> Option<VecError> {
    if dropped.is_empty() {
        return None;
    }
    Some(VecError::RebuildAborted {
        dropped: dropped.len(),
        user_ids: dropped.to_vec(),
    })
}

/// What a call to [`VectorIndex::rebuild`] did.
#[derive(Debug, Clone)]
pub enum RebuildOutcome {
    /// A new snapshot is active.
    Rebuilt(RebuildReport),
    /// Nothing valid was staged; the active snapshot is unchanged.
    Unchanged { generation: u64, dropped: Vec<String> },
    /// Another rebuild was in flight; this request relies on it.
    Coalesced { generation: u64 },
}

impl RebuildOutcome {
    /// Generation active once this call returned.
    pub fn generation(&self) -> u64 {
        match self {
            RebuildOutcome::Rebuilt(r) => r.generation,
            RebuildOutcome::Unchanged { generation, .. } => *generation,
            RebuildOutcome::Coalesced { generation } => *generation,
        }
    }

    pub fn report(&self) -> Option<&RebuildReport> {
        match self {
            RebuildOutcome::Rebuilt(r) => Some(r),
            _ => None,
        }
    }

    pub fn aborted(&self) -> Option<VecError> {
        match self {
            RebuildOutcome::Rebuilt(r) => r.aborted(),
            RebuildOutcome::Unchanged { dropped, .. } => aborted_error(dropped),
            RebuildOutcome::Coalesced { .. } => None,
        }
    }
}

/// Point-in-time counters for a [`VectorIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub generation: u64,
    pub indexed: usize,
    pub staged: usize,
    pub rebuilds: u64,
    pub coalesced: u64,
    pub peak_concurrent_rebuilds: usize,
}

#[derive(Default)]
struct Counters {
    rebuilds: AtomicU64,
    coalesced: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// VectorIndex serves similarity queries over an immutable HNSW snapshot
/// plus a small staging set of embeddings not yet built into a snapshot.
///
/// - `stage` makes an embedding searchable at once (exact scan).
/// - `rebuild` folds staging into a new snapshot and swaps it in atomically.
/// - `query` never waits for a rebuild: it copies the staging set under a
///   short lock and then loads the active snapshot pointer.
///
/// All methods are safe for concurrent use.
pub struct VectorIndex {
    cfg: HnswConfig,
    active: ArcSwap<IndexSnapshot>,
    staging: Mutex<StagingSet>,
    rebuild_lock: Mutex<()>,
    counters: Counters,
}

impl VectorIndex {
    /// An index starting from the empty generation-0 snapshot.
    pub fn new(cfg: HnswConfig) -> Self {
        Self::with_snapshot(cfg.clone(), IndexSnapshot::empty(cfg))
    }

    /// An index starting from a previously built (e.g. loaded) snapshot.
    /// Fails if the snapshot's dimension differs from `cfg.dim`.
    pub fn open(mut cfg: HnswConfig, snapshot: IndexSnapshot) -> Result<Self, VecError> {
        cfg.set_defaults();
        if snapshot.config().dim != cfg.dim {
            return Err(VecError::DimensionMismatch {
                got: snapshot.config().dim,
                want: cfg.dim,
            });
        }
        Ok(Self::with_snapshot(cfg, snapshot))
    }

    fn with_snapshot(mut cfg: HnswConfig, snapshot: IndexSnapshot) -> Self {
        assert!(cfg.dim > 0, "vecstore: HnswConfig.dim must be positive");
        cfg.set_defaults();
        Self {
            cfg,
            active: ArcSwap::from_pointee(snapshot),
            staging: Mutex::new(StagingSet::new()),
            rebuild_lock: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.cfg.dim
    }

    /// The active snapshot. The returned `Arc` stays valid across rebuilds.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.active.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.active.load().generation()
    }

    pub fn staged_len(&self) -> usize {
        self.staging.lock().len()
    }

    pub fn is_staged(&self, user_id: &str) -> bool {
        self.staging.lock().contains(user_id)
    }

    /// Copy of the pending entry for `user_id`, if any.
    pub fn staged(&self, user_id: &str) -> Option<StagingEntry> {
        self.staging.lock().get(user_id).cloned()
    }

    /// Accept `embedding` as the live embedding of `user_id`, replacing any
    /// earlier pending one. Returns the staging size after the insert.
    ///
    /// The dimension is not checked here; mismatched entries are dropped by
    /// the next rebuild.
    pub fn stage(&self, embedding: &[f32], user_id: &str) -> usize {
        let mut staging = self.staging.lock();
        let replaced = staging.upsert(user_id, embedding);
        debug!(user_id, replaced, staged = staging.len(), "vecstore: staged embedding");
        staging.len()
    }

    /// Return up to `k` best matches for `embedding` across the active
    /// snapshot and the staging set.
    ///
    /// Ordered by similarity descending, then by index_id (staged hits,
    /// which have none, after indexed ones), then by user_id. A snapshot
    /// entry whose user is currently staged is hidden behind the staged
    /// embedding.
    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<QueryHit>, VecError> {
        if embedding.len() != self.cfg.dim {
            return Err(VecError::DimensionMismatch {
                got: embedding.len(),
                want: self.cfg.dim,
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }

        // Staging first, snapshot second: a rebuild swaps before it clears,
        // so an entry missing from this copy is already in the loaded snapshot.
        let staged = self.staging.lock().entries();
        let snapshot = self.active.load_full();
        let generation = snapshot.generation();

        let shadowed: HashSet<&str> = staged.iter().map(|e| e.user_id.as_str()).collect();

        let mut hits: Vec<QueryHit> = snapshot
            .search(embedding, k + shadowed.len())?
            .into_iter()
            .filter(|h| !shadowed.contains(h.user_id.as_str()))
            .map(|h| QueryHit {
                user_id: h.user_id,
                index_id: Some(h.index_id),
                generation,
                similarity: h.similarity,
            })
            .collect();

        hits.extend(staged.iter().map(|e| QueryHit {
            user_id: e.user_id.clone(),
            index_id: None,
            generation,
            similarity: cosine_similarity(embedding, &e.embedding),
        }));

        hits.sort_by(compare_hits);
        hits.truncate(k);
        Ok(hits)
    }

    /// Fold every staged entry into a new snapshot and make it active.
    ///
    /// At most one rebuild runs at a time; a call made while another is in
    /// flight returns [`RebuildOutcome::Coalesced`] immediately. Entries
    /// staged while the build runs stay staged for the next cycle.
    pub fn rebuild(&self) -> Result<RebuildOutcome, VecError> {
        let Some(_guard) = self.rebuild_lock.try_lock() else {
            self.counters.coalesced.fetch_add(1, AtomicOrdering::Relaxed);
            debug!("vecstore: rebuild already in flight, coalescing");
            return Ok(RebuildOutcome::Coalesced {
                generation: self.generation(),
            });
        };

        let in_flight = self.counters.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.counters
            .peak_in_flight
            .fetch_max(in_flight, AtomicOrdering::SeqCst);

        let result = self.rebuild_locked();

        self.counters.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
        result
    }

    fn rebuild_locked(&self) -> Result<RebuildOutcome, VecError> {
        let started = Instant::now();
        let staged = self.staging.lock().entries();
        let current = self.active.load_full();

        let (valid, invalid): (Vec<StagingEntry>, Vec<StagingEntry>) = staged
            .into_iter()
            .partition(|e| e.embedding.len() == self.cfg.dim);

        let dropped: Vec<String> = invalid.iter().map(|e| e.user_id.clone()).collect();
        if !invalid.is_empty() {
            for e in &invalid {
                warn!(
                    user_id = %e.user_id,
                    got = e.embedding.len(),
                    want = self.cfg.dim,
                    "vecstore: dropping staged entry with wrong dimension"
                );
            }
            self.staging.lock().remove_folded(&invalid);
        }

        if valid.is_empty() {
            return Ok(RebuildOutcome::Unchanged {
                generation: current.generation(),
                dropped,
            });
        }

        // Surviving entries keep their relative order; a restaged user
        // takes over its old slot and new users are appended.
        let replacements: HashMap<&str, &StagingEntry> =
            valid.iter().map(|e| (e.user_id.as_str(), e)).collect();
        let mut entries: Vec<(String, Vec<f32>)> = Vec::with_capacity(current.len() + valid.len());
        for entry in current.iter() {
            let embedding = match replacements.get(entry.user_id) {
                Some(staged) => staged.embedding.to_vec(),
                None => entry.embedding.to_vec(),
            };
            entries.push((entry.user_id.to_string(), embedding));
        }
        for e in &valid {
            if current.index_id_of(&e.user_id).is_none() {
                entries.push((e.user_id.clone(), e.embedding.to_vec()));
            }
        }

        let generation = current.generation() + 1;
        info!(
            generation,
            entries = entries.len(),
            staged = valid.len(),
            "vecstore: rebuilding snapshot"
        );
        let next = IndexSnapshot::build(generation, self.cfg.clone(), entries)?;

        let assignments: Vec<FaceAssignment> = next
            .iter()
            .filter(|e| {
                replacements.contains_key(e.user_id)
                    || current.index_id_of(e.user_id) != Some(e.index_id)
            })
            .map(|e| FaceAssignment {
                user_id: e.user_id.to_string(),
                index_id: e.index_id,
            })
            .collect();
        let indexed = next.len();

        self.active.store(Arc::new(next));
        self.staging.lock().remove_folded(&valid);
        self.counters.rebuilds.fetch_add(1, AtomicOrdering::Relaxed);

        let elapsed = started.elapsed();
        info!(
            generation,
            indexed,
            folded = valid.len(),
            dropped = dropped.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "vecstore: snapshot swapped"
        );

        Ok(RebuildOutcome::Rebuilt(RebuildReport {
            generation,
            previous_generation: current.generation(),
            indexed,
            folded: valid.into_iter().map(|e| e.user_id).collect(),
            assignments,
            dropped,
            elapsed,
        }))
    }

    pub fn stats(&self) -> IndexStats {
        let snapshot = self.active.load();
        IndexStats {
            generation: snapshot.generation(),
            indexed: snapshot.len(),
            staged: self.staged_len(),
            rebuilds: self.counters.rebuilds.load(AtomicOrdering::Relaxed),
            coalesced: self.counters.coalesced.load(AtomicOrdering::Relaxed),
            peak_concurrent_rebuilds: self.counters.peak_in_flight.load(AtomicOrdering::SeqCst),
        }
    }
}

fn compare_hits(a: &QueryHit, b: &QueryHit) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| match (a.index_id, b.index_id) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.user_id.cmp(&b.user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn cfg(dim: usize) -> HnswConfig {
        HnswConfig {
            dim,
            m: 8,
            ef_construction: 64,
            ef_search: 32,
            seed: 5,
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot % dim] = 1.0;
        v
    }

    #[test]
    fn test_staged_entry_is_queryable_before_rebuild() {
        let idx = VectorIndex::new(cfg(4));
        idx.stage(&unit(4, 0), "alice");

        let hits = idx.query(&unit(4, 0), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user_id, "alice");
        assert!(hits[0].is_staged());
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(idx.generation(), 0);
    }

    #[test]
    fn test_restage_keeps_one_entry() {
        let idx = VectorIndex::new(cfg(4));
        for i in 0..5 {
            idx.stage(&unit(4, i), "alice");
        }
        assert_eq!(idx.staged_len(), 1);
        assert_eq!(&*idx.staged("alice").unwrap().embedding, unit(4, 4).as_slice());
    }

    #[test]
    fn test_rebuild_folds_and_clears_staging() {
        let idx = VectorIndex::new(cfg(4));
        idx.stage(&unit(4, 0), "alice");
        idx.stage(&unit(4, 1), "bob");

        let outcome = idx.rebuild().unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.previous_generation, 0);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.folded, vec!["alice", "bob"]);
        assert_eq!(report.assignments.len(), 2);
        assert_eq!(idx.staged_len(), 0);

        let hits = idx.query(&unit(4, 1), 1).unwrap();
        assert_eq!(hits[0].user_id, "bob");
        assert_eq!(hits[0].generation, 1);
        assert_eq!(
            hits[0].index_id,
            idx.snapshot().index_id_of("bob")
        );
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_rebuild_with_empty_staging_is_noop() {
        let idx = VectorIndex::new(cfg(4));
        match idx.rebuild().unwrap() {
            RebuildOutcome::Unchanged { generation, dropped } => {
                assert_eq!(generation, 0);
                assert!(dropped.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_restaged_user_shadows_snapshot_entry() {
        let idx = VectorIndex::new(cfg(4));
        idx.stage(&unit(4, 0), "alice");
        idx.rebuild().unwrap();

        idx.stage(&unit(4, 1), "alice");
        let hits = idx.query(&unit(4, 0), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_staged());
        assert!(hits[0].similarity < 0.5);

        let report = idx.rebuild().unwrap().report().cloned().unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.assignments, vec![FaceAssignment {
            user_id: "alice".into(),
            index_id: 0,
        }]);
        let hits = idx.query(&unit(4, 1), 1).unwrap();
        assert_eq!(hits[0].index_id, Some(0));
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_rebuild_keeps_existing_ids_and_appends_new() {
        let idx = VectorIndex::new(cfg(8));
        idx.stage(&unit(8, 0), "carol");
        idx.stage(&unit(8, 1), "alice");
        idx.rebuild().unwrap();
        let before = idx.snapshot();

        idx.stage(&unit(8, 2), "bob");
        let report = idx.rebuild().unwrap().report().cloned().unwrap();
        let after = idx.snapshot();

        assert_eq!(after.index_id_of("alice"), before.index_id_of("alice"));
        assert_eq!(after.index_id_of("carol"), before.index_id_of("carol"));
        assert_eq!(after.index_id_of("bob"), Some(2));
        assert_eq!(report.assignments, vec![FaceAssignment {
            user_id: "bob".into(),
            index_id: 2,
        }]);
    }

    #[test]
    fn test_rebuild_drops_only_mismatched_entries() {
        let idx = VectorIndex::new(cfg(4));
        idx.stage(&unit(4, 0), "alice");
        idx.stage(&[1.0, 0.0], "corrupt");

        let outcome = idx.rebuild().unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.folded, vec!["alice"]);
        assert_eq!(report.dropped, vec!["corrupt"]);
        assert!(matches!(
            outcome.aborted(),
            Some(VecError::RebuildAborted { dropped: 1, .. })
        ));
        assert_eq!(idx.staged_len(), 0);
        assert_eq!(idx.snapshot().len(), 1);
    }

    #[test]
    fn test_rebuild_all_mismatched_leaves_snapshot() {
        let idx = VectorIndex::new(cfg(4));
        idx.stage(&[1.0], "corrupt");
        let outcome = idx.rebuild().unwrap();
        assert!(matches!(outcome, RebuildOutcome::Unchanged { generation: 0, .. }));
        assert!(outcome.aborted().is_some());
        assert_eq!(idx.staged_len(), 0);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let idx = VectorIndex::new(cfg(4));
        assert!(matches!(
            idx.query(&[1.0, 0.0], 3),
            Err(VecError::DimensionMismatch { got: 2, want: 4 })
        ));
    }

    #[test]
    fn test_tie_break_prefers_indexed_then_user_id() {
        let idx = VectorIndex::new(cfg(4));
        idx.stage(&unit(4, 0), "zed");
        idx.rebuild().unwrap();
        idx.stage(&unit(4, 0), "bob");
        idx.stage(&unit(4, 0), "amy");

        let ids: Vec<String> = idx
            .query(&unit(4, 0), 3)
            .unwrap()
            .into_iter()
            .map(|h| h.user_id)
            .collect();
        assert_eq!(ids, vec!["zed", "amy", "bob"]);
    }

    #[test]
    fn test_old_snapshot_survives_swap() {
        let idx = VectorIndex::new(cfg(4));
        idx.stage(&unit(4, 0), "alice");
        idx.rebuild().unwrap();

        let held = idx.snapshot();
        idx.stage(&unit(4, 1), "bob");
        idx.rebuild().unwrap();

        assert_eq!(held.generation(), 1);
        assert_eq!(held.len(), 1);
        assert_eq!(idx.generation(), 2);
        assert!(held.search(&unit(4, 0), 1).unwrap()[0].user_id == "alice");
    }

    #[test]
    fn test_open_rejects_wrong_dimension() {
        let snap = IndexSnapshot::empty(cfg(3));
        assert!(VectorIndex::open(cfg(4), snap).is_err());
    }

    #[test]
    fn test_parallel_rebuilds_are_mutually_exclusive() {
        let idx = Arc::new(VectorIndex::new(cfg(16)));
        for i in 0..200 {
            let mut v = unit(16, i);
            v[(i * 7 + 3) % 16] += 0.5;
            idx.stage(&v, &format!("user-{i:03}"));
        }

        let n = 8;
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let idx = Arc::clone(&idx);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    idx.rebuild().unwrap()
                })
            })
            .collect();
        let outcomes: Vec<RebuildOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stats = idx.stats();
        assert_eq!(stats.peak_concurrent_rebuilds, 1);
        let rebuilt = outcomes
            .iter()
            .filter(|o| matches!(o, RebuildOutcome::Rebuilt(_)))
            .count() as u64;
        assert_eq!(stats.rebuilds, rebuilt);
        assert_eq!(stats.generation, rebuilt);
        assert_eq!(stats.indexed, 200);
        assert_eq!(stats.staged, 0);
    }

    #[test]
    fn test_queries_during_rebuild_always_find_user() {
        let idx = Arc::new(VectorIndex::new(cfg(8)));
        for i in 0..50 {
            let mut v = unit(8, i);
            v[(i + 3) % 8] += 0.25 * (i % 4) as f32;
            idx.stage(&v, &format!("u{i}"));
        }
        idx.stage(&unit(8, 5), "target");

        let reader = {
            let idx = Arc::clone(&idx);
            thread::spawn(move || {
                for _ in 0..200 {
                    let hits = idx.query(&unit(8, 5), 60).unwrap();
                    assert!(hits.iter().any(|h| h.user_id == "target"));
                    let unique: HashSet<&str> = hits.iter().map(|h| h.user_id.as_str()).collect();
                    assert_eq!(unique.len(), hits.len(), "duplicate user in results");
                }
            })
        };
        idx.rebuild().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_hit_order_is_total_with_nan() {
        let hit = |user_id: &str, index_id: Option<u32>, similarity: f32| QueryHit {
            user_id: user_id.into(),
            index_id,
            generation: 1,
            similarity,
        };
        let mut hits = vec![
            hit("c", None, f32::NAN),
            hit("b", Some(1), 0.5),
            hit("a", Some(0), 0.9),
            hit("d", Some(2), 0.5),
        ];
        hits.sort_by(compare_hits);
        let order: Vec<&str> = hits.iter().map(|h| h.user_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
    }
}
