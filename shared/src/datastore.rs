//! Hierarchical document store collaborator.
//!
//! The hosted realtime database exposes a JSON tree over REST. This service
//! needs four operations: read a subtree, read a subtree filtered on a
//! child value, apply a multi-path update in one request, and claim a flag
//! with a conditional write.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

/// Multi-path update body: slash-separated path to new value. `null` deletes.
pub type PathUpdates = BTreeMap<String, Value>;

/// Failure talking to the datastore.
#[derive(Debug, Error)]
pub enum DatastoreError {
    /// The request never produced a response.
    #[error("datastore request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The store answered with a non-success status.
    #[error("datastore returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, trimmed.
        body: String,
    },
    /// The client was misconfigured or the store is a fake told to fail.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

/// Operations the service needs from the document store.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Reads the subtree at `path`. `Ok(None)` when nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<Value>, DatastoreError>;

    /// Reads the children of `path` whose `child` field equals `equal_to`.
    async fn read_where(
        &self,
        path: &str,
        child: &str,
        equal_to: &str,
    ) -> Result<Option<Value>, DatastoreError>;

    /// Applies every path in `updates` as one atomic write.
    async fn update(&self, updates: PathUpdates) -> Result<(), DatastoreError>;

    /// Sets `path` to `true` unless it already holds a set flag (anything
    /// but `null` or `false`). Returns `true` only for the caller that set
    /// it, so concurrent claims of the same path have exactly one winner.
    async fn claim(&self, path: &str) -> Result<bool, DatastoreError>;
}

/// Conditional writes retried before giving up on a contended path.
const CLAIM_ATTEMPTS: usize = 5;

fn is_set_flag(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Server-side increment sentinel understood by the hosted store.
pub fn server_increment(delta: i64) -> Value {
    json!({ ".sv": { "increment": delta } })
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// REST client for the hosted realtime database.
#[derive(Clone)]
pub struct RealtimeDatabase {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl RealtimeDatabase {
    /// Builds a client for `base_url` (for example
    /// `https://example-default-rtdb.firebaseio.com`).
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DatastoreError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(DatastoreError::Unavailable("datastore url is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            auth_token: auth_token.filter(|token| !token.trim().is_empty()),
            client,
        })
    }

    fn url_for(&self, path: &str) -> String {
        let path = normalize_path(path);
        if path.is_empty() {
            format!("{}/.json", self.base_url)
        } else {
            format!("{}/{path}.json", self.base_url)
        }
    }

    fn auth_query(&self) -> Vec<(&'static str, String)> {
        self.auth_token
            .iter()
            .map(|token| ("auth", token.clone()))
            .collect()
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<Option<Value>, DatastoreError> {
        let response = request.query(&self.auth_query()).send().await?;
        let value = Self::json_body(response).await?;
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    async fn json_body(response: reqwest::Response) -> Result<Value, DatastoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DatastoreError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(response.json::<Value>().await?)
    }

    /// Reads `path` together with the ETag the store assigns to its value.
    async fn read_tagged(&self, path: &str) -> Result<(Value, String), DatastoreError> {
        let response = self
            .client
            .get(self.url_for(path))
            .header("X-Firebase-ETag", "true")
            .query(&self.auth_query())
            .send()
            .await?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| DatastoreError::Unavailable(format!("no ETag returned for {path}")))?;
        let value = Self::json_body(response).await?;
        Ok((value, etag))
    }
}

#[async_trait]
impl Datastore for RealtimeDatabase {
    async fn read(&self, path: &str) -> Result<Option<Value>, DatastoreError> {
        self.fetch(self.client.get(self.url_for(path))).await
    }

    async fn read_where(
        &self,
        path: &str,
        child: &str,
        equal_to: &str,
    ) -> Result<Option<Value>, DatastoreError> {
        // Query parameters are JSON literals, hence the embedded quotes.
        let request = self.client.get(self.url_for(path)).query(&[
            ("orderBy", Value::String(child.to_string()).to_string()),
            ("equalTo", Value::String(equal_to.to_string()).to_string()),
        ]);
        self.fetch(request).await
    }

    async fn update(&self, updates: PathUpdates) -> Result<(), DatastoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let body: Map<String, Value> = updates.into_iter().collect();
        self.fetch(self.client.patch(self.url_for("")).json(&body))
            .await
            .map(|_| ())
    }

    async fn claim(&self, path: &str) -> Result<bool, DatastoreError> {
        for _ in 0..CLAIM_ATTEMPTS {
            let (current, etag) = self.read_tagged(path).await?;
            if is_set_flag(&current) {
                return Ok(false);
            }
            let response = self
                .client
                .put(self.url_for(path))
                .header(reqwest::header::IF_MATCH, etag)
                .query(&self.auth_query())
                .json(&Value::Bool(true))
                .send()
                .await?;
            if response.status() == reqwest::StatusCode::PRECONDITION_FAILED {
                tracing::debug!("conditional write of {path} lost a race, retrying");
                continue;
            }
            Self::json_body(response).await?;
            return Ok(true);
        }
        Err(DatastoreError::Status {
            status: reqwest::StatusCode::PRECONDITION_FAILED.as_u16(),
            body: format!("{path} kept changing during {CLAIM_ATTEMPTS} conditional writes"),
        })
    }
}

/// In-memory JSON tree with the same semantics as the hosted store.
///
/// Used by tests and local development. `fail_reads` / `fail_writes` make
/// the matching operations return [`DatastoreError::Unavailable`].
#[derive(Default)]
pub struct MemoryDatastore {
    root: RwLock<Value>,
    update_calls: AtomicU64,
    fail_reads: RwLock<Vec<String>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryDatastore {
    /// Creates a store holding `root`.
    pub fn new(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
            ..Self::default()
        }
    }

    /// Number of `update` calls that reached the store.
    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Makes reads under `path_prefix` fail.
    pub async fn fail_reads_under(&self, path_prefix: &str) {
        self.fail_reads.write().await.push(normalize_path(path_prefix));
    }

    /// Makes every subsequent `update` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of the whole tree.
    pub async fn snapshot(&self) -> Value {
        self.root.read().await.clone()
    }

    async fn check_read(&self, path: &str) -> Result<(), DatastoreError> {
        let path = normalize_path(path);
        let failing = self.fail_reads.read().await;
        if failing
            .iter()
            .any(|prefix| prefix.is_empty() || path == *prefix || path.starts_with(&format!("{prefix}/")))
        {
            return Err(DatastoreError::Unavailable(format!("read of {path} refused")));
        }
        Ok(())
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = normalize_path(path);
    if path.is_empty() {
        return Some(root);
    }
    path.split('/')
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

fn apply_update(root: &mut Value, path: &str, value: Value) {
    let path = normalize_path(path);
    let segments = path.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>();
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(children) = node else {
            return;
        };
        node = children
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(children) = node else {
        return;
    };

    if let Some(delta) = increment_delta(&value) {
        let current = children.get(*last).and_then(Value::as_i64).unwrap_or(0);
        children.insert(last.to_string(), json!(current + delta));
    } else if value.is_null() {
        children.remove(*last);
    } else {
        children.insert(last.to_string(), value);
    }
}

fn increment_delta(value: &Value) -> Option<i64> {
    value.get(".sv")?.get("increment")?.as_i64()
}

fn prune_empty(node: &mut Value) {
    if let Value::Object(children) = node {
        for child in children.values_mut() {
            prune_empty(child);
        }
        children.retain(|_, child| !matches!(child, Value::Object(map) if map.is_empty()));
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn read(&self, path: &str) -> Result<Option<Value>, DatastoreError> {
        self.check_read(path).await?;
        let root = self.root.read().await;
        Ok(lookup(&root, path).filter(|value| !value.is_null()).cloned())
    }

    async fn read_where(
        &self,
        path: &str,
        child: &str,
        equal_to: &str,
    ) -> Result<Option<Value>, DatastoreError> {
        self.check_read(path).await?;
        let root = self.root.read().await;
        let Some(Value::Object(entries)) = lookup(&root, path) else {
            return Ok(None);
        };
        let matched = entries
            .iter()
            .filter(|(_, record)| record.get(child).and_then(Value::as_str) == Some(equal_to))
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect::<Map<_, _>>();
        Ok((!matched.is_empty()).then_some(Value::Object(matched)))
    }

    async fn update(&self, updates: PathUpdates) -> Result<(), DatastoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatastoreError::Unavailable("writes refused".to_string()));
        }
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut root = self.root.write().await;
        for (path, value) in updates {
            apply_update(&mut root, &path, value);
        }
        prune_empty(&mut root);
        Ok(())
    }

    async fn claim(&self, path: &str) -> Result<bool, DatastoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatastoreError::Unavailable("writes refused".to_string()));
        }
        let mut root = self.root.write().await;
        if lookup(&root, path).is_some_and(is_set_flag) {
            return Ok(false);
        }
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        apply_update(&mut root, path, Value::Bool(true));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn client(server: &MockServer, token: Option<&str>) -> RealtimeDatabase {
        RealtimeDatabase::new(&server.uri(), token.map(str::to_string), Duration::from_secs(5))
            .expect("build client")
    }

    #[tokio::test]
    async fn read_appends_json_suffix_and_auth_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/articles.json"))
            .and(query_param("auth", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "a1": { "views": 3 } })))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server, Some("secret")).read("/articles/").await.expect("read");
        assert_eq!(value, Some(json!({ "a1": { "views": 3 } })));
    }

    #[tokio::test]
    async fn read_maps_null_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
            .mount(&server)
            .await;

        assert_eq!(client(&server, None).read("users").await.expect("read"), None);
    }

    #[tokio::test]
    async fn read_where_sends_quoted_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/articles.json"))
            .and(query_param("orderBy", "\"status\""))
            .and(query_param("equalTo", "\"scheduled\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server, None)
            .read_where("articles", "status", "scheduled")
            .await
            .expect("filtered read");
        assert_eq!(value, Some(json!({})));
    }

    #[tokio::test]
    async fn update_patches_root_with_multi_path_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/.json"))
            .and(body_json(json!({
                "articles/a1/scheduleDate": null,
                "articles/a1/status": "accepted",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let mut updates = PathUpdates::new();
        updates.insert("articles/a1/status".to_string(), json!("accepted"));
        updates.insert("articles/a1/scheduleDate".to_string(), Value::Null);
        client(&server, None).update(updates).await.expect("update");
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"Permission denied\"}"))
            .mount(&server)
            .await;

        let err = client(&server, None).read("articles").await.expect_err("must fail");
        match err {
            DatastoreError::Status {
                status,
                body,
            } => {
                assert_eq!(status, 401);
                assert!(body.contains("Permission denied"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn memory_store_applies_multi_path_updates_and_increments() {
        let store = MemoryDatastore::new(json!({
            "articles": { "a1": { "status": "scheduled", "scheduleDate": 1, "views": 2 } }
        }));
        let mut updates = PathUpdates::new();
        updates.insert("articles/a1/status".to_string(), json!("accepted"));
        updates.insert("articles/a1/scheduleDate".to_string(), Value::Null);
        updates.insert("articles/a1/views".to_string(), server_increment(1));
        updates.insert("articles/a2/views".to_string(), server_increment(1));
        store.update(updates).await.expect("update");

        assert_eq!(
            store.read("articles").await.expect("read"),
            Some(json!({
                "a1": { "status": "accepted", "views": 3 },
                "a2": { "views": 1 },
            }))
        );
        assert_eq!(store.update_calls(), 1);
    }

    #[tokio::test]
    async fn memory_store_filters_and_fails_on_request() {
        let store = MemoryDatastore::new(json!({
            "articles": {
                "a1": { "status": "scheduled" },
                "a2": { "status": "accepted" },
            }
        }));
        let filtered = store
            .read_where("articles", "status", "scheduled")
            .await
            .expect("filtered read");
        assert_eq!(filtered, Some(json!({ "a1": { "status": "scheduled" } })));
        assert_eq!(store.read_where("articles", "status", "rejected").await.expect("read"), None);

        store.fail_reads_under("articles").await;
        assert!(store.read("articles/a1").await.is_err());
        assert!(store.read("users").await.is_ok());
    }

    #[tokio::test]
    async fn claim_puts_flag_with_matching_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/articles/a1/likedBy/u1.json"))
            .and(header("X-Firebase-ETag", "true"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "etag-empty")
                    .set_body_json(Value::Null),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/articles/a1/likedBy/u1.json"))
            .and(header("if-match", "etag-empty"))
            .and(body_json(json!(true)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let claimed = client(&server, None)
            .claim("articles/a1/likedBy/u1")
            .await
            .expect("claim");
        assert!(claimed);
    }

    #[tokio::test]
    async fn claim_rereads_after_conflict_and_reports_lost_race() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/articles/a1/likedBy/u1.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "etag-empty")
                    .set_body_json(Value::Null),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/articles/a1/likedBy/u1.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "etag-set")
                    .set_body_json(json!(true)),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(header("if-match", "etag-empty"))
            .respond_with(ResponseTemplate::new(412).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let claimed = client(&server, None)
            .claim("articles/a1/likedBy/u1")
            .await
            .expect("claim");
        assert!(!claimed);
    }

    #[tokio::test]
    async fn memory_claim_has_a_single_winner() {
        let store = MemoryDatastore::new(json!({
            "articles": { "a1": { "likedBy": { "u2": false } } }
        }));

        let (first, second) = tokio::join!(
            store.claim("articles/a1/likedBy/u1"),
            store.claim("articles/a1/likedBy/u1")
        );
        let wins = [first.expect("claim"), second.expect("claim")];
        assert_eq!(wins.iter().filter(|won| **won).count(), 1);

        assert!(store.claim("articles/a1/likedBy/u2").await.expect("claim"));
        assert_eq!(
            store.read("articles/a1/likedBy").await.expect("read"),
            Some(json!({ "u1": true, "u2": true }))
        );
    }
}
