use std::path::PathBuf;
use std::sync::Arc;

use facevault_profile::ProfileStore;
use facevault_vecstore::{
    IndexSnapshot, IndexStats, QueryHit, RebuildOutcome, RebuildReport, VecError, VectorIndex,
    load_snapshot_file, save_snapshot_file,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// FaceIndex owns the process-wide [`VectorIndex`] and keeps the profile
/// store's face_ids and the on-disk snapshot in step with it.
///
/// Lifecycle: [`FaceIndex::open`] at startup loads the persisted snapshot
/// (or starts at generation 0) and reconciles face_ids with it; every
/// successful rebuild updates the changed face_ids and rewrites the
/// snapshot file.
pub struct FaceIndex {
    index: VectorIndex,
    profiles: Arc<dyn ProfileStore>,
    snapshot_path: Option<PathBuf>,
    rebuild_threshold: usize,
    /// Held while a rebuild's results are written out, so face_id updates
    /// and snapshot saves of different rebuilds never overlap.
    persisted: Mutex<Persisted>,
}

#[derive(Debug)]
struct Persisted {
    /// Generation the stored face_ids are known to match; `None` after a
    /// failed write.
    published: Option<u64>,
    /// Generation of the snapshot file on disk.
    saved: u64,
}

impl FaceIndex {
    /// Open the index. With a `snapshot_path`, a previously saved snapshot
    /// is loaded from it and each rebuild is persisted to it.
    pub fn open(
        cfg: &PipelineConfig,
        profiles: Arc<dyn ProfileStore>,
        snapshot_path: Option<PathBuf>,
    ) -> Result<Self, PipelineError> {
        cfg.validate()?;
        let hnsw = cfg.hnsw_config();

        let loaded = match &snapshot_path {
            Some(path) => load_snapshot_file(path)?,
            None => None,
        };
        let index = match loaded {
            Some(snapshot) => {
                info!(
                    generation = snapshot.generation(),
                    entries = snapshot.len(),
                    "pipeline: loaded index snapshot"
                );
                VectorIndex::open(hnsw, snapshot)?
            }
            None => VectorIndex::new(hnsw),
        };

        let face_index = Self {
            index,
            profiles,
            snapshot_path,
            rebuild_threshold: cfg.rebuild_threshold,
            persisted: Mutex::new(Persisted {
                published: None,
                saved: 0,
            }),
        };
        let generation = face_index.reconcile()?;
        *face_index.persisted.lock() = Persisted {
            published: Some(generation),
            saved: generation,
        };
        Ok(face_index)
    }

    /// Bring stored face_ids in line with the active snapshot if they were
    /// recorded against another generation.
    fn reconcile(&self) -> Result<u64, PipelineError> {
        let snapshot = self.index.snapshot();
        let stored = self.profiles.index_generation()?;
        if stored == Some(snapshot.generation()) {
            return Ok(snapshot.generation());
        }

        let changed = self
            .profiles
            .reset_face_ids(snapshot.generation(), &all_assignments(&snapshot))?;
        if changed > 0 {
            warn!(
                stored_generation = ?stored,
                generation = snapshot.generation(),
                changed,
                "pipeline: face_ids reconciled with loaded snapshot"
            );
        }
        Ok(snapshot.generation())
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.index.snapshot()
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn is_staged(&self, user_id: &str) -> bool {
        self.index.is_staged(user_id)
    }

    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<QueryHit>, PipelineError> {
        Ok(self.index.query(embedding, k)?)
    }

    /// Stage `embedding` for `user_id`. Returns true when the staging set
    /// has grown past the rebuild threshold.
    pub fn stage(&self, user_id: &str, embedding: &[f32]) -> bool {
        self.index.stage(embedding, user_id) > self.rebuild_threshold
    }

    /// Rebuild on the calling thread, then persist the snapshot and update
    /// face_ids. Blocks for the duration of the HNSW build.
    pub fn rebuild_blocking(&self) -> Result<RebuildOutcome, PipelineError> {
        let outcome = self.index.rebuild()?;

        if let Some(VecError::RebuildAborted { user_ids, .. }) = outcome.aborted() {
            warn!(?user_ids, "pipeline: staged entries dropped by rebuild");
        }

        if let RebuildOutcome::Rebuilt(report) = &outcome {
            self.persist(report)?;
        }
        Ok(outcome)
    }

    /// Write out the active snapshot after `report`'s rebuild: face_ids
    /// first, then the snapshot file. A later rebuild may already have
    /// swapped in a newer snapshot; whatever is active is written, and
    /// nothing older than what is already on disk.
    fn persist(&self, report: &RebuildReport) -> Result<(), PipelineError> {
        let mut state = self.persisted.lock();
        let snapshot = self.index.snapshot();

        let published = self.publish_face_ids(&mut state, report, &snapshot);

        if let Some(path) = &self.snapshot_path {
            if snapshot.generation() > state.saved {
                save_snapshot_file(&snapshot, path)?;
                state.saved = snapshot.generation();
                info!(
                    generation = snapshot.generation(),
                    path = %path.display(),
                    "pipeline: index snapshot saved"
                );
            }
        }
        published
    }

    /// Write face_ids for `snapshot`. The report's assignments are applied
    /// alone only when the store is known to hold exactly the previous
    /// generation; otherwise every face_id is rewritten.
    fn publish_face_ids(
        &self,
        state: &mut Persisted,
        report: &RebuildReport,
        snapshot: &IndexSnapshot,
    ) -> Result<(), PipelineError> {
        let generation = snapshot.generation();
        if state.published == Some(generation) {
            return Ok(());
        }

        let incremental =
            state.published == Some(report.previous_generation) && generation == report.generation;
        let result = if incremental {
            let assignments: Vec<(String, u32)> = report
                .assignments
                .iter()
                .map(|a| (a.user_id.clone(), a.index_id))
                .collect();
            self.profiles.set_face_ids(generation, &assignments)
        } else {
            self.profiles
                .reset_face_ids(generation, &all_assignments(snapshot))
        };

        match result {
            Ok(updated) => {
                state.published = Some(generation);
                info!(generation, updated, incremental, "pipeline: face_ids updated");
                Ok(())
            }
            Err(e) => {
                state.published = None;
                error!(generation, error = %e, "pipeline: failed to update face_ids");
                Err(e.into())
            }
        }
    }

    /// Rebuild on the blocking thread pool.
    pub async fn rebuild(self: &Arc<Self>) -> Result<RebuildOutcome, PipelineError> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.rebuild_blocking())
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?
    }

    /// Run a rebuild every `cfg.rebuild_interval()` while anything is
    /// staged, until `shutdown` is cancelled.
    pub fn spawn_ticker(
        self: &Arc<Self>,
        cfg: &PipelineConfig,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = cfg.rebuild_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if this.index.staged_len() == 0 {
                    continue;
                }
                if let Err(e) = this.rebuild().await {
                    error!(error = %e, "pipeline: periodic rebuild failed");
                }
            }
        })
    }
}

fn all_assignments(snapshot: &IndexSnapshot) -> Vec<(String, u32)> {
    snapshot
        .iter()
        .map(|e| (e.user_id.to_string(), e.index_id))
        .collect()
}
