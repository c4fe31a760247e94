//! Shared domain code for the newsroom backend: the article and user model,
//! the datastore and authentication-directory collaborators, the dashboard
//! aggregation pipeline and the scheduled-publication planner.

pub mod analytics;
pub mod article;
pub mod dashboard;
pub mod datastore;
pub mod demo;
pub mod directory;
pub mod publication;
pub mod timestamp;
pub mod users;

use serde_json::Value;

pub use article::{Article, ArticleStatus};
pub use dashboard::{DashboardConfig, DashboardError, DashboardPipeline, DashboardSnapshot};
pub use datastore::{Datastore, DatastoreError, MemoryDatastore, PathUpdates, RealtimeDatabase};
pub use directory::{AuthDirectory, DirectoryError, IdentityToolkitDirectory, StaticDirectory};

/// Flattens a collection snapshot into `(key, record)` pairs.
///
/// The hosted store renders collections with dense integer keys as arrays,
/// so both shapes are accepted. Entries that are not objects are dropped.
pub(crate) fn keyed_records(collection: Value) -> Vec<(String, Value)> {
    match collection {
        Value::Object(entries) => entries
            .into_iter()
            .filter(|(_, record)| record.is_object())
            .collect(),
        Value::Array(entries) => entries
            .into_iter()
            .enumerate()
            .filter(|(_, record)| record.is_object())
            .map(|(index, record)| (index.to_string(), record))
            .collect(),
        _ => Vec::new(),
    }
}
