//! Redb-backed persistent profile store.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableTable, Table, TableDefinition};

use crate::error::{ProfileError, ProfileResult};
use crate::store::ProfileStore;
use crate::types::{Identity, ProfileFields, Upserted};

const IDENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("identities");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const META_INDEX_GENERATION: &str = "index_generation";

fn storage(e: impl std::fmt::Display) -> ProfileError {
    ProfileError::Storage(e.to_string())
}

fn decode(bytes: &[u8]) -> ProfileResult<Identity> {
    serde_json::from_slice(bytes).map_err(|e| ProfileError::Serialization(e.to_string()))
}

fn encode(identity: &Identity) -> ProfileResult<Vec<u8>> {
    serde_json::to_vec(identity).map_err(|e| ProfileError::Serialization(e.to_string()))
}

fn read_identity(
    table: &Table<'_, &'static str, &'static [u8]>,
    user_id: &str,
) -> ProfileResult<Option<Identity>> {
    let bytes = table
        .get(user_id)
        .map_err(storage)?
        .map(|v| v.value().to_vec());
    bytes.as_deref().map(decode).transpose()
}

fn write_identity(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    identity: &Identity,
) -> ProfileResult<()> {
    let bytes = encode(identity)?;
    table
        .insert(identity.user_id.as_str(), bytes.as_slice())
        .map_err(storage)?;
    Ok(())
}

/// A persistent profile store backed by redb. Identities are stored as
/// JSON keyed by user_id; every operation is one write transaction.
pub struct RedbProfileStore {
    db: Database,
}

impl RedbProfileStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> ProfileResult<Self> {
        let db = Database::create(path).map_err(storage)?;

        let tx = db.begin_write().map_err(storage)?;
        {
            tx.open_table(IDENTITIES).map_err(storage)?;
            tx.open_table(META).map_err(storage)?;
        }
        tx.commit().map_err(storage)?;

        Ok(Self { db })
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut Table<'_, &'static str, &'static [u8]>) -> ProfileResult<T>,
    ) -> ProfileResult<T> {
        let tx = self.db.begin_write().map_err(storage)?;
        let out = {
            let mut table = tx.open_table(IDENTITIES).map_err(storage)?;
            f(&mut table)?
        };
        tx.commit().map_err(storage)?;
        Ok(out)
    }

    fn update_face_ids(
        &self,
        generation: u64,
        f: impl FnOnce(&mut Table<'_, &'static str, &'static [u8]>) -> ProfileResult<usize>,
    ) -> ProfileResult<usize> {
        let tx = self.db.begin_write().map_err(storage)?;
        let n = {
            let mut table = tx.open_table(IDENTITIES).map_err(storage)?;
            let n = f(&mut table)?;
            let mut meta = tx.open_table(META).map_err(storage)?;
            meta.insert(META_INDEX_GENERATION, generation)
                .map_err(storage)?;
            n
        };
        tx.commit().map_err(storage)?;
        Ok(n)
    }
}

impl ProfileStore for RedbProfileStore {
    fn get(&self, user_id: &str) -> ProfileResult<Option<Identity>> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(IDENTITIES).map_err(storage)?;
        match table.get(user_id).map_err(storage)? {
            Some(value) => decode(value.value()).map(Some),
            None => Ok(None),
        }
    }

    fn upsert(&self, user_id: &str, fields: &ProfileFields) -> ProfileResult<Upserted> {
        self.update(|table| {
            let now = Utc::now();
            let (mut identity, created) = match read_identity(table, user_id)? {
                Some(identity) => (identity, false),
                None => (Identity::new(user_id, now), true),
            };
            let changed = identity.fill_blanks(fields);
            if changed && !created {
                identity.updated_at = now;
            }
            if changed || created {
                write_identity(table, &identity)?;
            }
            Ok(Upserted { identity, created })
        })
    }

    fn merge(&self, user_id: &str, fields: &ProfileFields) -> ProfileResult<Identity> {
        self.update(|table| {
            let now = Utc::now();
            let (mut identity, created) = match read_identity(table, user_id)? {
                Some(identity) => (identity, false),
                None => (Identity::new(user_id, now), true),
            };
            if identity.overwrite(fields) {
                identity.updated_at = now;
                write_identity(table, &identity)?;
            } else if created {
                write_identity(table, &identity)?;
            }
            Ok(identity)
        })
    }

    fn list(&self) -> ProfileResult<Vec<Identity>> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(IDENTITIES).map_err(storage)?;

        let mut out = Vec::new();
        for item in table.iter().map_err(storage)? {
            let (_, value) = item.map_err(storage)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    fn set_face_ids(&self, generation: u64, assignments: &[(String, u32)]) -> ProfileResult<usize> {
        self.update_face_ids(generation, |table| {
            let now = Utc::now();
            let mut updated = 0;
            for (user_id, face_id) in assignments {
                let Some(mut identity) = read_identity(table, user_id)? else {
                    tracing::warn!(%user_id, "profile: face_id for unknown identity skipped");
                    continue;
                };
                identity.face_id = Some(*face_id);
                identity.updated_at = now;
                write_identity(table, &identity)?;
                updated += 1;
            }
            Ok(updated)
        })
    }

    fn reset_face_ids(
        &self,
        generation: u64,
        assignments: &[(String, u32)],
    ) -> ProfileResult<usize> {
        let wanted: BTreeMap<&str, u32> = assignments
            .iter()
            .map(|(u, id)| (u.as_str(), *id))
            .collect();
        self.update_face_ids(generation, |table| {
            let mut all = Vec::new();
            for item in table.iter().map_err(storage)? {
                let (_, value) = item.map_err(storage)?;
                all.push(decode(value.value())?);
            }

            let now = Utc::now();
            let mut changed = 0;
            for mut identity in all {
                let face_id = wanted.get(identity.user_id.as_str()).copied();
                if identity.face_id != face_id {
                    identity.face_id = face_id;
                    identity.updated_at = now;
                    write_identity(table, &identity)?;
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn index_generation(&self) -> ProfileResult<Option<u64>> {
        let tx = self.db.begin_read().map_err(storage)?;
        let meta = tx.open_table(META).map_err(storage)?;
        Ok(meta
            .get(META_INDEX_GENERATION)
            .map_err(storage)?
            .map(|v| v.value()))
    }
}
