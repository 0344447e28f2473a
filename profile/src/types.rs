use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A person known to the system, keyed by the external `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// index_id of this identity's embedding in the store's recorded index
    /// generation; `None` until the first rebuild that includes it.
    #[serde(default)]
    pub face_id: Option<u32>,
    /// Free-form profile data (date of birth, height, residence, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: String::new(),
            email: String::new(),
            face_id: None,
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill name, email and attributes that are still blank. Returns true if
    /// anything changed.
    pub(crate) fn fill_blanks(&mut self, fields: &ProfileFields) -> bool {
        let mut changed = false;
        if let Some(name) = fields.name.as_deref().filter(|s| !s.is_empty()) {
            if self.name.is_empty() {
                self.name = name.to_string();
                changed = true;
            }
        }
        if let Some(email) = fields.email.as_deref().filter(|s| !s.is_empty()) {
            if self.email.is_empty() {
                self.email = email.to_string();
                changed = true;
            }
        }
        for (k, v) in &fields.attributes {
            if !self.attributes.contains_key(k) {
                self.attributes.insert(k.clone(), v.clone());
                changed = true;
            }
        }
        changed
    }

    /// Overwrite every field `fields` provides. Returns true if anything
    /// changed.
    pub(crate) fn overwrite(&mut self, fields: &ProfileFields) -> bool {
        let mut changed = false;
        if let Some(name) = &fields.name {
            changed |= self.name != *name;
            self.name = name.clone();
        }
        if let Some(email) = &fields.email {
            changed |= self.email != *email;
            self.email = email.clone();
        }
        for (k, v) in &fields.attributes {
            if self.attributes.get(k) != Some(v) {
                self.attributes.insert(k.clone(), v.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Optional metadata supplied with an enrollment or an import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub email: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl ProfileFields {
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }
}

/// Result of [`crate::ProfileStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub identity: Identity,
    /// True if the identity did not exist before.
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_blanks_keeps_existing() {
        let mut id = Identity::new("alice", Utc::now());
        id.name = "Alice".into();

        let changed = id.fill_blanks(
            &ProfileFields::default()
                .with_name("Someone Else")
                .with_email("alice@example.com"),
        );
        assert!(changed);
        assert_eq!(id.name, "Alice");
        assert_eq!(id.email, "alice@example.com");
        assert!(!id.fill_blanks(&ProfileFields::default().with_name("")));
    }

    #[test]
    fn test_overwrite() {
        let mut id = Identity::new("bob", Utc::now());
        id.attributes.insert("height".into(), "180".into());
        assert!(id.overwrite(&ProfileFields::default().with_attribute("height", "182")));
        assert_eq!(id.attributes["height"], "182");
        assert!(!id.overwrite(&ProfileFields::default().with_attribute("height", "182")));
    }

    #[test]
    fn test_json_omits_empty_attributes() {
        let id = Identity::new("carol", Utc::now());
        let json = serde_json::to_string(&id).unwrap();
        assert!(!json.contains("attributes"));
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
