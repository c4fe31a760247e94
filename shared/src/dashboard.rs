//! Dashboard aggregation pipeline.
//!
//! Users come from the authentication directory, overlaid with profiles from
//! the legacy datastore paths. When the directory is down the legacy paths
//! are read directly. Placeholder data is only ever used in demo mode, and
//! the snapshot says so.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
    analytics::{
        article_totals, frequency_tables, recent_users, registration_histogram, CountEntry,
        MonthlyCount, RecentUser, RECENT_USER_LIMIT,
    },
    article::{articles_from_collection, Article},
    datastore::{Datastore, DatastoreError},
    demo::{demo_articles, demo_users},
    directory::{AuthDirectory, DEFAULT_MAX_IDENTITIES},
    timestamp::format_timestamp,
    users::{legacy_users, merge_users, profile_lookup, DashboardUser, ProfileRecord, UserSource},
};

/// Legacy root keys that have held user profiles over time, oldest first.
pub const DEFAULT_LEGACY_USER_PATHS: &[&str] = &["users", "userProfiles", "profiles"];
/// Root key of the article collection.
pub const DEFAULT_ARTICLES_PATH: &str = "articles";

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    /// Root key of the article collection.
    pub articles_path: String,
    /// Ordered legacy user paths. Later paths win on profile collisions.
    pub legacy_user_paths: Vec<String>,
    /// Cap on identities listed from the directory.
    pub max_identities: usize,
    /// Substitute placeholder data when no real source is available.
    pub demo_mode: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            articles_path: DEFAULT_ARTICLES_PATH.to_string(),
            legacy_user_paths: DEFAULT_LEGACY_USER_PATHS
                .iter()
                .map(|path| (*path).to_string())
                .collect(),
            max_identities: DEFAULT_MAX_IDENTITIES,
            demo_mode: false,
        }
    }
}

/// Unrecoverable pipeline failure.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Directory failed and every legacy path was empty or unreadable.
    #[error("no user source available: directory failed ({directory}) and legacy paths {paths:?} yielded no users")]
    NoUserSource {
        /// Directory failure.
        directory: String,
        /// Legacy paths probed.
        paths: Vec<String>,
    },
    /// The article collection could not be read.
    #[error("failed to read articles: {0}")]
    Articles(#[source] DatastoreError),
}

/// Users plus how they were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUsers {
    /// Merged users.
    pub users: Vec<DashboardUser>,
    /// Which path produced them.
    pub source: UserSource,
    /// Sources that failed but were recovered from.
    pub degraded: Vec<String>,
}

/// Analytics snapshot returned by the dashboard endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    /// Number of users.
    pub total_users: u64,
    /// Number of articles.
    pub total_articles: u64,
    /// Sum of article views.
    pub total_views: u64,
    /// Sum of article likes.
    pub total_likes: u64,
    /// Sum of article shares.
    pub total_shares: u64,
    /// Articles with content warnings.
    pub sensitive_count: u64,
    /// Newest registrations.
    pub recent_users: Vec<RecentUser>,
    /// Registrations per month, oldest first.
    pub monthly_registrations: Vec<MonthlyCount>,
    /// Articles per category.
    pub category_counts: Vec<CountEntry>,
    /// Articles per tag.
    pub tag_counts: Vec<CountEntry>,
    /// Where the user list came from.
    pub user_source: UserSource,
    /// Sources that failed but were recovered from.
    pub degraded_sources: Vec<String>,
    /// Whether any placeholder data was used.
    pub demo: bool,
    /// Computation time.
    pub generated_at: String,
}

/// Reads both sources and computes dashboard snapshots.
#[derive(Clone)]
pub struct DashboardPipeline {
    datastore: Arc<dyn Datastore>,
    directory: Arc<dyn AuthDirectory>,
    config: DashboardConfig,
}

impl DashboardPipeline {
    /// Pipeline over the given collaborators.
    pub fn new(
        datastore: Arc<dyn Datastore>,
        directory: Arc<dyn AuthDirectory>,
        config: DashboardConfig,
    ) -> Self {
        Self {
            datastore,
            directory,
            config,
        }
    }

    /// Pipeline settings.
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Resolves the user list: directory plus profile overlay, then the
    /// legacy fallback, then (demo mode only) placeholders.
    pub async fn resolve_users(&self, now: DateTime<Utc>) -> Result<ResolvedUsers, DashboardError> {
        let mut degraded = Vec::new();
        let directory_err = match self.directory.list_identities(self.config.max_identities).await {
            Ok(identities) => {
                let profiles = self.load_profiles(&mut degraded).await;
                return Ok(ResolvedUsers {
                    users: merge_users(identities, &profiles),
                    source: UserSource::Directory,
                    degraded,
                });
            },
            Err(err) => err,
        };

        tracing::warn!("auth directory listing failed, reading legacy user paths: {directory_err}");
        degraded.push("directory".to_string());

        for path in &self.config.legacy_user_paths {
            match self.datastore.read(path).await {
                Ok(Some(snapshot)) => {
                    let users = legacy_users(snapshot, now);
                    if !users.is_empty() {
                        tracing::info!("loaded {} users from legacy path {path}", users.len());
                        return Ok(ResolvedUsers {
                            users,
                            source: UserSource::Legacy,
                            degraded,
                        });
                    }
                },
                Ok(None) => {},
                Err(err) => {
                    tracing::warn!("failed to read legacy user path {path}: {err}");
                    degraded.push(format!("datastore:{path}"));
                },
            }
        }

        if self.config.demo_mode {
            tracing::warn!("no user source available, serving demo users");
            return Ok(ResolvedUsers {
                users: demo_users(now),
                source: UserSource::Demo,
                degraded,
            });
        }

        Err(DashboardError::NoUserSource {
            directory: directory_err.to_string(),
            paths: self.config.legacy_user_paths.clone(),
        })
    }

    async fn load_profiles(&self, degraded: &mut Vec<String>) -> HashMap<String, ProfileRecord> {
        let mut snapshots = Vec::with_capacity(self.config.legacy_user_paths.len());
        for path in &self.config.legacy_user_paths {
            match self.datastore.read(path).await {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {},
                Err(err) => {
                    tracing::warn!("failed to read profiles from {path}: {err}");
                    degraded.push(format!("datastore:{path}"));
                },
            }
        }
        profile_lookup(snapshots)
    }

    async fn load_articles(&self, degraded: &mut Vec<String>) -> Result<(Vec<Article>, bool), DashboardError> {
        match self.datastore.read(&self.config.articles_path).await {
            Ok(snapshot) => Ok((snapshot.map(articles_from_collection).unwrap_or_default(), false)),
            Err(err) if self.config.demo_mode => {
                tracing::warn!("failed to read articles, serving demo articles: {err}");
                degraded.push(format!("datastore:{}", self.config.articles_path));
                Ok((demo_articles(), true))
            },
            Err(err) => Err(DashboardError::Articles(err)),
        }
    }

    /// Computes a fresh snapshot.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<DashboardSnapshot, DashboardError> {
        let resolved = self.resolve_users(now).await?;
        let mut degraded = resolved.degraded;
        let (articles, placeholder_articles) = self.load_articles(&mut degraded).await?;

        let totals = article_totals(&articles);
        let tables = frequency_tables(&articles);
        Ok(DashboardSnapshot {
            total_users: resolved.users.len() as u64,
            total_articles: totals.total_articles,
            total_views: totals.total_views,
            total_likes: totals.total_likes,
            total_shares: totals.total_shares,
            sensitive_count: totals.sensitive_count,
            recent_users: recent_users(&resolved.users, RECENT_USER_LIMIT),
            monthly_registrations: registration_histogram(&resolved.users, now),
            category_counts: tables.categories,
            tag_counts: tables.tags,
            user_source: resolved.source,
            degraded_sources: degraded,
            demo: placeholder_articles || resolved.source == UserSource::Demo,
            generated_at: format_timestamp(now),
        })
    }

    /// Number of users, resolved the same way as the snapshot.
    pub async fn user_count(&self, now: DateTime<Utc>) -> Result<usize, DashboardError> {
        Ok(self.resolve_users(now).await?.users.len())
    }
}
