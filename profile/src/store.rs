use std::fmt;

use crate::error::ProfileResult;
use crate::types::{Identity, ProfileFields, Upserted};

/// ProfileStore is the durable table of identities.
///
/// Every method is one atomic operation on the store. Identities are never
/// deleted by the pipeline.
pub trait ProfileStore: Send + Sync {
    fn get(&self, user_id: &str) -> ProfileResult<Option<Identity>>;

    /// Create the identity if absent. An existing identity keeps its
    /// metadata; only blank fields are filled from `fields`.
    fn upsert(&self, user_id: &str, fields: &ProfileFields) -> ProfileResult<Upserted>;

    /// Create the identity if absent and overwrite every field `fields`
    /// provides.
    fn merge(&self, user_id: &str, fields: &ProfileFields) -> ProfileResult<Identity>;

    /// All identities, sorted by user_id.
    fn list(&self) -> ProfileResult<Vec<Identity>>;

    /// Record the face_ids that changed in index generation `generation`.
    /// Assignments for unknown user_ids are skipped. Returns the number of
    /// identities updated.
    fn set_face_ids(&self, generation: u64, assignments: &[(String, u32)]) -> ProfileResult<usize>;

    /// Replace every face_id: identities in `assignments` get theirs, all
    /// others are cleared. Used to reconcile with a snapshot loaded at
    /// startup. Returns the number of identities whose face_id changed.
    fn reset_face_ids(&self, generation: u64, assignments: &[(String, u32)])
    -> ProfileResult<usize>;

    /// The index generation the stored face_ids refer to, if any was ever
    /// recorded.
    fn index_generation(&self) -> ProfileResult<Option<u64>>;
}

impl fmt::Debug for dyn ProfileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileStore {{ ... }}")
    }
}
