//! Identity records for enrolled faces.
//!
//! Provides a trait-based store with an in-memory implementation for tests
//! and a redb-based implementation for persistence.

pub mod error;
pub mod import;
pub mod memory;
pub mod redb;
pub mod store;
pub mod types;

pub use error::{ProfileError, ProfileResult};
pub use import::{import_file, import_profiles};
pub use memory::MemoryProfileStore;
pub use redb::RedbProfileStore;
pub use store::ProfileStore;
pub use types::{Identity, ProfileFields, Upserted};
