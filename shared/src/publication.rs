//! Promotion of scheduled articles whose publish time has elapsed.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    article::{articles_from_collection, Article, ArticleStatus, PUBLISHED_STATUS},
    datastore::{Datastore, DatastoreError, PathUpdates},
};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Scheduled articles inspected.
    pub scanned: usize,
    /// Articles promoted to published.
    pub published: usize,
}

/// Ids of scheduled articles whose `scheduleDate` is at or before `now`,
/// sorted. Scheduled articles without a readable `scheduleDate` are skipped.
pub fn due_publications(articles: &[Article], now: DateTime<Utc>) -> Vec<String> {
    let mut due = articles
        .iter()
        .filter(|article| article.status == ArticleStatus::Scheduled)
        .filter_map(|article| match article.schedule_time() {
            Some(at) if at <= now => Some(article.id.clone()),
            Some(_) => None,
            None => {
                tracing::warn!(
                    "scheduled article {} has no usable scheduleDate: {:?}",
                    article.id,
                    article.schedule_date
                );
                None
            },
        })
        .collect::<Vec<_>>();
    due.sort();
    due
}

/// Multi-path update flipping every id in `due` to published and clearing
/// its `scheduleDate` in the same write.
pub fn publication_updates(articles_path: &str, due: &[String]) -> PathUpdates {
    let root = articles_path.trim_matches('/');
    let mut updates = PathUpdates::new();
    for id in due {
        updates.insert(
            format!("{root}/{id}/status"),
            Value::String(PUBLISHED_STATUS.as_str().to_string()),
        );
        updates.insert(format!("{root}/{id}/scheduleDate"), Value::Null);
    }
    updates
}

/// Reads scheduled articles, promotes the due ones with a single write and
/// reports what happened. Issues no write when nothing is due.
pub async fn reconcile_scheduled(
    datastore: &dyn Datastore,
    articles_path: &str,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, DatastoreError> {
    let snapshot = match datastore
        .read_where(articles_path, "status", ArticleStatus::Scheduled.as_str())
        .await
    {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::warn!("filtered read of {articles_path} failed, scanning whole collection: {err}");
            datastore.read(articles_path).await?
        },
    };

    let articles = snapshot.map(articles_from_collection).unwrap_or_default();
    let scanned = articles
        .iter()
        .filter(|article| article.status == ArticleStatus::Scheduled)
        .count();
    let due = due_publications(&articles, now);
    if due.is_empty() {
        return Ok(ReconcileOutcome {
            scanned,
            published: 0,
        });
    }

    datastore
        .update(publication_updates(articles_path, &due))
        .await?;
    Ok(ReconcileOutcome {
        scanned,
        published: due.len(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::datastore::MemoryDatastore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn millis(at: DateTime<Utc>) -> i64 {
        at.timestamp_millis()
    }

    #[test]
    fn only_elapsed_scheduled_articles_are_due() {
        let articles = articles_from_collection(json!({
            "past": { "status": "scheduled", "scheduleDate": millis(now() - Duration::seconds(1)) },
            "exact": { "status": "scheduled", "scheduleDate": "2026-10-19T09:00:00Z" },
            "future": { "status": "scheduled", "scheduleDate": millis(now() + Duration::hours(1)) },
            "published": { "status": "accepted", "scheduleDate": 0 },
            "broken": { "status": "scheduled", "scheduleDate": "soon" },
        }));
        assert_eq!(due_publications(&articles, now()), vec!["exact".to_string(), "past".to_string()]);
    }

    #[test]
    fn updates_pair_status_and_schedule_per_article() {
        let updates = publication_updates("/articles/", &["a1".to_string()]);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates.get("articles/a1/status"), Some(&json!("accepted")));
        assert_eq!(updates.get("articles/a1/scheduleDate"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn reconcile_publishes_due_articles_and_leaves_future_ones() {
        let store = MemoryDatastore::new(json!({
            "articles": {
                "due": {
                    "status": "scheduled",
                    "scheduleDate": millis(now() - Duration::seconds(1)),
                    "views": 4
                },
                "later": {
                    "status": "scheduled",
                    "scheduleDate": millis(now() + Duration::hours(1))
                },
                "draft": { "status": "draft" }
            }
        }));

        let outcome = reconcile_scheduled(&store, "articles", now()).await.expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome {
            scanned: 2,
            published: 1
        });

        let tree = store.snapshot().await;
        assert_eq!(tree["articles"]["due"], json!({ "status": "accepted", "views": 4 }));
        assert_eq!(tree["articles"]["later"]["status"], json!("scheduled"));
        assert_eq!(tree["articles"]["draft"], json!({ "status": "draft" }));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let store = MemoryDatastore::new(json!({
            "articles": {
                "a": { "status": "scheduled", "scheduleDate": "2020-01-01" },
                "b": { "status": "scheduled", "scheduleDate": "2021-01-01T00:00" }
            }
        }));

        let first = reconcile_scheduled(&store, "articles", now()).await.expect("first run");
        let after_first = store.snapshot().await;
        let second = reconcile_scheduled(&store, "articles", now()).await.expect("second run");

        assert_eq!(first.published, 2);
        assert_eq!(second, ReconcileOutcome::default());
        assert_eq!(store.update_calls(), 1);
        assert_eq!(store.snapshot().await, after_first);
    }

    #[tokio::test]
    async fn empty_collection_issues_no_write() {
        let store = MemoryDatastore::new(json!({}));
        let outcome = reconcile_scheduled(&store, "articles", now()).await.expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::default());
        assert_eq!(store.update_calls(), 0);
    }

    #[tokio::test]
    async fn write_failure_is_returned_to_caller() {
        let store = MemoryDatastore::new(json!({
            "articles": { "a": { "status": "scheduled", "scheduleDate": 0 } }
        }));
        store.fail_writes(true);
        assert!(reconcile_scheduled(&store, "articles", now()).await.is_err());
        assert_eq!(store.snapshot().await["articles"]["a"]["status"], json!("scheduled"));
    }

    #[tokio::test]
    async fn filtered_and_full_scan_paths_select_the_same_articles() {
        let tree = json!({
            "articles": {
                "mixed": { "status": "Scheduled", "scheduleDate": 0 },
                "exact": { "status": "scheduled", "scheduleDate": 0 }
            }
        });

        let filtered = MemoryDatastore::new(tree.clone());
        let via_filter = reconcile_scheduled(&filtered, "articles", now()).await.expect("reconcile");

        let scanned = FilterlessStore(MemoryDatastore::new(tree));
        let via_scan = reconcile_scheduled(&scanned, "articles", now()).await.expect("reconcile");

        assert_eq!(via_filter, ReconcileOutcome {
            scanned: 1,
            published: 1
        });
        assert_eq!(via_scan, via_filter);
        for store in [&filtered, &scanned.0] {
            let tree = store.snapshot().await;
            assert_eq!(tree["articles"]["exact"], json!({ "status": "accepted" }));
            assert_eq!(tree["articles"]["mixed"]["status"], json!("Scheduled"));
        }
    }

    /// Store without an index on `status`: filtered reads always fail.
    struct FilterlessStore(MemoryDatastore);

    #[async_trait::async_trait]
    impl Datastore for FilterlessStore {
        async fn read(&self, path: &str) -> Result<Option<Value>, DatastoreError> {
            self.0.read(path).await
        }

        async fn read_where(
            &self,
            _path: &str,
            _child: &str,
            _equal_to: &str,
        ) -> Result<Option<Value>, DatastoreError> {
            Err(DatastoreError::Status {
                status: 400,
                body: "Index not defined".to_string(),
            })
        }

        async fn update(&self, updates: PathUpdates) -> Result<(), DatastoreError> {
            self.0.update(updates).await
        }

        async fn claim(&self, path: &str) -> Result<bool, DatastoreError> {
            self.0.claim(path).await
        }
    }
}
