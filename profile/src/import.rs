//! Bulk profile seeding from YAML.
//!
//! ```yaml
//! - user_id: alice
//!   name: Alice Liddell
//!   email: alice@example.com
//!   date_of_birth: 1990-04-01
//!   height: 168
//! ```
//!
//! Keys other than `user_id`, `name` and `email` become attributes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ProfileError, ProfileResult};
use crate::store::ProfileStore;
use crate::types::ProfileFields;

#[derive(Debug, Deserialize)]
struct ProfileSeed {
    user_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

fn scalar_to_string(key: &str, value: serde_yaml::Value) -> ProfileResult<Option<String>> {
    use serde_yaml::Value;
    Ok(match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s),
        _ => {
            return Err(ProfileError::Serialization(format!(
                "attribute {key:?} must be a scalar"
            )));
        }
    })
}

/// Merge every profile in `yaml` into `store`. Returns the number of
/// profiles imported.
pub fn import_profiles(store: &dyn ProfileStore, yaml: &str) -> ProfileResult<usize> {
    let seeds: Vec<ProfileSeed> =
        serde_yaml::from_str(yaml).map_err(|e| ProfileError::Serialization(e.to_string()))?;

    let mut fields_by_user = Vec::with_capacity(seeds.len());
    for seed in seeds {
        if seed.user_id.is_empty() {
            return Err(ProfileError::Serialization("empty user_id".into()));
        }
        let mut fields = ProfileFields {
            name: seed.name,
            email: seed.email,
            attributes: BTreeMap::new(),
        };
        for (k, v) in seed.extra {
            if let Some(s) = scalar_to_string(&k, v)? {
                fields.attributes.insert(k, s);
            }
        }
        fields_by_user.push((seed.user_id, fields));
    }

    for (user_id, fields) in &fields_by_user {
        store.merge(user_id, fields)?;
    }
    tracing::info!(count = fields_by_user.len(), "profile: imported profiles");
    Ok(fields_by_user.len())
}

/// Like [`import_profiles`], reading the YAML from `path`.
pub fn import_file(store: &dyn ProfileStore, path: &Path) -> ProfileResult<usize> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| ProfileError::Storage(format!("read {}: {e}", path.display())))?;
    import_profiles(store, &yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProfileStore;

    const SEED: &str = r#"
- user_id: alice
  name: Alice Liddell
  email: alice@example.com
  date_of_birth: "1990-04-01"
  height: 168
  notes: ~
- user_id: bob
  residence: Lisbon
"#;

    #[test]
    fn test_import() {
        let store = MemoryProfileStore::new();
        assert_eq!(import_profiles(&store, SEED).unwrap(), 2);

        let alice = store.get("alice").unwrap().unwrap();
        assert_eq!(alice.name, "Alice Liddell");
        assert_eq!(alice.attributes["height"], "168");
        assert_eq!(alice.attributes["date_of_birth"], "1990-04-01");
        assert!(!alice.attributes.contains_key("notes"));

        let bob = store.get("bob").unwrap().unwrap();
        assert_eq!(bob.name, "");
        assert_eq!(bob.attributes["residence"], "Lisbon");
    }

    #[test]
    fn test_import_merges_existing() {
        let store = MemoryProfileStore::new();
        store
            .upsert("bob", &ProfileFields::default().with_name("Bob"))
            .unwrap();
        import_profiles(&store, SEED).unwrap();
        assert_eq!(store.get("bob").unwrap().unwrap().name, "Bob");
    }

    #[test]
    fn test_import_rejects_nested() {
        let store = MemoryProfileStore::new();
        let yaml = "- user_id: x\n  pets: [cat]\n";
        assert!(import_profiles(&store, yaml).is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_import_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.yaml");
        std::fs::write(&path, SEED).unwrap();
        let store = MemoryProfileStore::new();
        assert_eq!(import_file(&store, &path).unwrap(), 2);
    }
}
