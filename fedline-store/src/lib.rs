//! # fedline-store
//!
//! Local persistence for fedline.
//!
//! - [`LocalStore`] - SQLite cache of profiles, posts, lists, messages,
//!   muted words and timeline windows. Foreign keys are enforced and deletes
//!   cascade; every write broadcasts a [`StoreChange`] after it commits.
//! - [`KeyValueStore`] - small opaque records such as the persisted session,
//!   with in-memory and SQLite backends.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod content;
mod error;
mod kv;
mod preferences;
mod profiles;
mod schema;
mod store;
mod timeline;

pub use error::{StoreError, StoreResult};
pub use kv::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use store::{LocalStore, StoreChange};
pub use timeline::{TimelineCommit, TimelineItem, TimelineMeta, TimelineTile};
