//! In-memory profile store for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::{ProfileError, ProfileResult};
use crate::store::ProfileStore;
use crate::types::{Identity, ProfileFields, Upserted};

#[derive(Default)]
struct State {
    identities: BTreeMap<String, Identity>,
    generation: Option<u64>,
}

/// A profile store backed by a BTreeMap.
#[derive(Clone, Default)]
pub struct MemoryProfileStore {
    state: Arc<Mutex<State>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ProfileResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| ProfileError::Storage(e.to_string()))
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get(&self, user_id: &str) -> ProfileResult<Option<Identity>> {
        Ok(self.lock()?.identities.get(user_id).cloned())
    }

    fn upsert(&self, user_id: &str, fields: &ProfileFields) -> ProfileResult<Upserted> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let created = !state.identities.contains_key(user_id);
        let identity = state
            .identities
            .entry(user_id.to_string())
            .or_insert_with(|| Identity::new(user_id, now));
        if identity.fill_blanks(fields) && !created {
            identity.updated_at = now;
        }
        Ok(Upserted {
            identity: identity.clone(),
            created,
        })
    }

    fn merge(&self, user_id: &str, fields: &ProfileFields) -> ProfileResult<Identity> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let identity = state
            .identities
            .entry(user_id.to_string())
            .or_insert_with(|| Identity::new(user_id, now));
        if identity.overwrite(fields) {
            identity.updated_at = now;
        }
        Ok(identity.clone())
    }

    fn list(&self) -> ProfileResult<Vec<Identity>> {
        Ok(self.lock()?.identities.values().cloned().collect())
    }

    fn set_face_ids(&self, generation: u64, assignments: &[(String, u32)]) -> ProfileResult<usize> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let mut updated = 0;
        for (user_id, face_id) in assignments {
            match state.identities.get_mut(user_id) {
                Some(identity) => {
                    identity.face_id = Some(*face_id);
                    identity.updated_at = now;
                    updated += 1;
                }
                None => tracing::warn!(%user_id, "profile: face_id for unknown identity skipped"),
            }
        }
        state.generation = Some(generation);
        Ok(updated)
    }

    fn reset_face_ids(
        &self,
        generation: u64,
        assignments: &[(String, u32)],
    ) -> ProfileResult<usize> {
        let mut state = self.lock()?;
        let wanted: BTreeMap<&str, u32> = assignments
            .iter()
            .map(|(u, id)| (u.as_str(), *id))
            .collect();
        let now = Utc::now();
        let mut changed = 0;
        for identity in state.identities.values_mut() {
            let face_id = wanted.get(identity.user_id.as_str()).copied();
            if identity.face_id != face_id {
                identity.face_id = face_id;
                identity.updated_at = now;
                changed += 1;
            }
        }
        state.generation = Some(generation);
        Ok(changed)
    }

    fn index_generation(&self) -> ProfileResult<Option<u64>> {
        Ok(self.lock()?.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::suite;

    #[test]
    fn test_upsert() {
        suite::upsert_creates_then_keeps(&MemoryProfileStore::new());
    }

    #[test]
    fn test_merge() {
        suite::merge_overwrites(&MemoryProfileStore::new());
    }

    #[test]
    fn test_face_ids() {
        suite::face_ids_follow_generation(&MemoryProfileStore::new());
    }

    #[test]
    fn test_clones_share_state() {
        let a = MemoryProfileStore::new();
        let b = a.clone();
        a.upsert("alice", &ProfileFields::default()).unwrap();
        assert!(b.get("alice").unwrap().is_some());
    }
}
