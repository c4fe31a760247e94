//! Article records as stored under the articles collection.
//!
//! Records were written by several generations of editorial clients, so the
//! decoder is deliberately forgiving: counters may be strings or missing,
//! timestamps come in several shapes and classification fields may live
//! under one of three keys.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{keyed_records, timestamp::parse_timestamp};

/// Category assigned when no classification field is present.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Editorial state of an article.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    /// Work in progress, not visible to readers.
    #[default]
    Draft,
    /// Waiting for `scheduleDate` to elapse.
    Scheduled,
    /// Published.
    Accepted,
    /// Rejected by an editor.
    Rejected,
    /// Any value this service does not know about. Never modified.
    #[serde(other)]
    Unknown,
}

impl ArticleStatus {
    /// Wire value of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }
}

/// The status an article is promoted to once its schedule elapses.
pub const PUBLISHED_STATUS: ArticleStatus = ArticleStatus::Accepted;

/// One article, keyed by its datastore id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Datastore key. Filled in from the collection, not from the record.
    #[serde(skip)]
    pub id: String,
    /// Headline, if any.
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: Option<String>,
    /// Editorial state.
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: ArticleStatus,
    /// Raw publish time, only meaningful while scheduled.
    #[serde(default)]
    pub schedule_date: Option<Value>,
    /// Raw creation time.
    #[serde(default)]
    pub created_at: Option<Value>,
    /// Read counter.
    #[serde(default, deserialize_with = "lenient_count")]
    pub views: u64,
    #[serde(default, deserialize_with = "lenient_optional_count")]
    upvote: Option<u64>,
    #[serde(default, deserialize_with = "lenient_optional_count")]
    like_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient_optional_count")]
    shared: Option<u64>,
    #[serde(default, deserialize_with = "lenient_optional_count")]
    share_count: Option<u64>,
    /// Explicit category chosen in the editor.
    #[serde(default, deserialize_with = "lenient_text")]
    pub article_category: Option<String>,
    /// Generic category field used by older clients.
    #[serde(default, deserialize_with = "lenient_text")]
    pub category: Option<String>,
    /// Comma-separated tag string. The first tag doubles as the category.
    #[serde(default, deserialize_with = "lenient_text")]
    pub tag: Option<String>,
    /// Content warnings attached by moderators.
    #[serde(default)]
    pub sensitive_tags: Option<Value>,
    /// Ids of users who liked the article.
    #[serde(default, deserialize_with = "lenient_member_set")]
    pub liked_by: BTreeSet<String>,
}

impl Article {
    /// Decodes one record. Returns `None` when the record is not an object.
    pub fn from_record(id: impl Into<String>, record: Value) -> Option<Self> {
        let id = id.into();
        if !record.is_object() {
            return None;
        }
        match serde_json::from_value::<Self>(record) {
            Ok(mut article) => {
                article.id = id;
                Some(article)
            },
            Err(err) => {
                tracing::warn!("skipping malformed article {id}: {err}");
                None
            },
        }
    }

    /// Like counter, falling back to the legacy `likeCount` key.
    pub fn likes(&self) -> u64 {
        self.upvote.or(self.like_count).unwrap_or(0)
    }

    /// Share counter, falling back to the legacy `shareCount` key.
    pub fn shares(&self) -> u64 {
        self.shared.or(self.share_count).unwrap_or(0)
    }

    /// Parsed `scheduleDate`.
    pub fn schedule_time(&self) -> Option<DateTime<Utc>> {
        self.schedule_date.as_ref().and_then(parse_timestamp)
    }

    /// Whether moderators attached at least one content warning.
    pub fn is_sensitive(&self) -> bool {
        matches!(&self.sensitive_tags, Some(Value::Array(tags)) if !tags.is_empty())
    }
}

/// Decodes a whole collection snapshot, dropping entries that are not
/// article objects.
pub fn articles_from_collection(collection: Value) -> Vec<Article> {
    keyed_records(collection)
        .into_iter()
        .filter_map(|(id, record)| Article::from_record(id, record))
        .collect()
}

fn lenient_status<'de, D>(deserializer: D) -> Result<ArticleStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        // Exact match only: the filtered store query compares the raw string,
        // and a full scan must select the same articles.
        Value::String(raw) => match raw.as_str() {
            "draft" => ArticleStatus::Draft,
            "scheduled" => ArticleStatus::Scheduled,
            "accepted" => ArticleStatus::Accepted,
            "rejected" => ArticleStatus::Rejected,
            _ => ArticleStatus::Unknown,
        },
        Value::Null => ArticleStatus::Draft,
        _ => ArticleStatus::Unknown,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(raw) => Some(raw),
        _ => None,
    })
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_optional_count(deserializer)?.unwrap_or(0))
}

fn lenient_optional_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(count_from_value(&value))
}

fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite())
                .map(|value| value.max(0.0) as u64)
        }),
        Value::String(raw) => {
            let raw = raw.trim();
            raw.parse::<u64>().ok().or_else(|| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .map(|value| value.max(0.0) as u64)
            })
        },
        _ => None,
    }
}

fn lenient_member_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(entries) => entries
            .into_iter()
            .filter(|(_, flag)| !matches!(flag, Value::Null | Value::Bool(false)))
            .map(|(user_id, _)| user_id)
            .collect(),
        Value::Array(entries) => entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::String(user_id) => Some(user_id),
                _ => None,
            })
            .collect(),
        _ => BTreeSet::new(),
    })
}
