//! Face embedding index: immutable HNSW snapshots plus a staging overlay.
//!
//! Embeddings become searchable the moment they are staged. A rebuild folds
//! staged entries into a freshly built snapshot and swaps it in without
//! blocking readers.

pub mod cosine;
pub mod error;
pub mod hnsw;
pub mod index;
pub mod snapshot;
pub mod snapshot_io;
pub mod staging;

pub use cosine::{cosine_distance, cosine_similarity, l2_normalize};
pub use error::VecError;
pub use hnsw::{Hnsw, HnswConfig, Neighbor};
pub use index::{FaceAssignment, IndexStats, QueryHit, RebuildOutcome, RebuildReport, VectorIndex};
pub use snapshot::{IndexEntry, IndexSnapshot, SnapshotHit};
pub use snapshot_io::{load as load_snapshot, load_file as load_snapshot_file, save as save_snapshot, save_file as save_snapshot_file};
pub use staging::{StagingEntry, StagingSet};
