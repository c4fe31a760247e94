//! Pure aggregation passes behind the dashboard snapshot.

use std::{cmp::Ordering, collections::HashMap};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use crate::{
    article::{Article, UNCATEGORIZED},
    timestamp::parse_timestamp_str,
    users::DashboardUser,
};

/// Number of trailing calendar months in the registration histogram.
pub const HISTOGRAM_MONTHS: u32 = 12;
/// Number of users listed as recent registrations.
pub const RECENT_USER_LIMIT: usize = 10;
const MISSING_NAME: &str = "Unknown User";
const MISSING_FIELD: &str = "N/A";

/// One row of a frequency table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountEntry {
    /// Category or tag.
    pub name: String,
    /// Number of articles.
    pub count: u64,
}

/// Category and tags resolved for one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Exactly one category per article.
    pub category: String,
    /// Tags, only populated from the comma-separated tag string.
    pub tags: Vec<String>,
}

/// Resolves an article's category, first match wins: explicit category,
/// generic category, first element of the tag string, then
/// [`UNCATEGORIZED`].
pub fn classify_article(article: &Article) -> Classification {
    let explicit = [&article.article_category, &article.category]
        .into_iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty());
    if let Some(category) = explicit {
        return Classification {
            category: category.to_string(),
            tags: Vec::new(),
        };
    }

    let tags = article
        .tag
        .as_deref()
        .map(split_tags)
        .unwrap_or_default();
    match tags.first() {
        Some(first) => Classification {
            category: first.clone(),
            tags,
        },
        None => Classification {
            category: UNCATEGORIZED.to_string(),
            tags: Vec::new(),
        },
    }
}

/// Splits a comma-separated tag string, dropping blank entries.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Category and tag frequency tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrequencyTables {
    /// One increment per article.
    pub categories: Vec<CountEntry>,
    /// Zero or more increments per article.
    pub tags: Vec<CountEntry>,
}

/// Tallies categories and tags over `articles`.
pub fn frequency_tables(articles: &[Article]) -> FrequencyTables {
    let mut category_counts: HashMap<String, u64> = HashMap::new();
    let mut tag_counts: HashMap<String, u64> = HashMap::new();
    for article in articles {
        let classification = classify_article(article);
        *category_counts.entry(classification.category).or_insert(0) += 1;
        for tag in classification.tags {
            *tag_counts.entry(tag).or_insert(0) += 1;
        }
    }
    FrequencyTables {
        categories: sorted_counts(category_counts),
        tags: sorted_counts(tag_counts),
    }
}

fn sorted_counts(counts: HashMap<String, u64>) -> Vec<CountEntry> {
    let mut entries = counts
        .into_iter()
        .map(|(name, count)| CountEntry {
            name,
            count,
        })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries
}

/// Aggregate article counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleTotals {
    /// Number of articles.
    pub total_articles: u64,
    /// Sum of `views`.
    pub total_views: u64,
    /// Sum of likes.
    pub total_likes: u64,
    /// Sum of shares.
    pub total_shares: u64,
    /// Articles carrying at least one content warning.
    pub sensitive_count: u64,
}

/// Sums counters over `articles`; missing counters count as zero.
pub fn article_totals(articles: &[Article]) -> ArticleTotals {
    articles.iter().fold(ArticleTotals::default(), |mut totals, article| {
        totals.total_articles += 1;
        totals.total_views = totals.total_views.saturating_add(article.views);
        totals.total_likes = totals.total_likes.saturating_add(article.likes());
        totals.total_shares = totals.total_shares.saturating_add(article.shares());
        if article.is_sensitive() {
            totals.sensitive_count += 1;
        }
        totals
    })
}

/// One histogram bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyCount {
    /// `YYYY-MM`.
    pub month: String,
    /// Short chart label, e.g. `Oct 2026`.
    pub label: String,
    /// Registrations in that month.
    pub count: u64,
}

/// Registrations per calendar month for the 12 months ending with the month
/// of `now`, oldest first. Users whose registration time cannot be parsed
/// are skipped.
pub fn registration_histogram(users: &[DashboardUser], now: DateTime<Utc>) -> Vec<MonthlyCount> {
    let current = month_index(now.year(), now.month());
    let first = current - i64::from(HISTOGRAM_MONTHS) + 1;
    let mut buckets = (first..=current)
        .map(|index| {
            let (year, month) = year_month(index);
            let label = NaiveDate::from_ymd_opt(year, month, 1)
                .map(|date| date.format("%b %Y").to_string())
                .unwrap_or_default();
            MonthlyCount {
                month: format!("{year:04}-{month:02}"),
                label,
                count: 0,
            }
        })
        .collect::<Vec<_>>();

    for user in users {
        let Some(created_at) = user.created_at.as_deref().and_then(parse_timestamp_str) else {
            tracing::warn!(
                "skipping user {} in registration histogram: unparseable createdAt {:?}",
                user.id,
                user.created_at
            );
            continue;
        };
        let index = month_index(created_at.year(), created_at.month());
        if (first..=current).contains(&index) {
            if let Some(bucket) = usize::try_from(index - first)
                .ok()
                .and_then(|offset| buckets.get_mut(offset))
            {
                bucket.count += 1;
            }
        }
    }

    buckets
}

fn month_index(year: i32, month: u32) -> i64 {
    i64::from(year) * 12 + i64::from(month) - 1
}

fn year_month(index: i64) -> (i32, u32) {
    let year = index.div_euclid(12) as i32;
    let month = index.rem_euclid(12) as u32 + 1;
    (year, month)
}

/// Recently registered user, with safe defaults for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentUser {
    /// User id.
    pub id: String,
    /// Display name or `Unknown User`.
    pub display_name: String,
    /// Email or `N/A`.
    pub email: String,
    /// Registration time or `N/A`.
    pub created_at: String,
    /// Role.
    pub role: String,
}

/// The `limit` most recently registered users, newest first. Users without a
/// parseable registration time sort last.
pub fn recent_users(users: &[DashboardUser], limit: usize) -> Vec<RecentUser> {
    let mut ordered = users
        .iter()
        .map(|user| (user.created_at.as_deref().and_then(parse_timestamp_str), user))
        .collect::<Vec<_>>();
    ordered.sort_by(|(left, _), (right, _)| match (left, right) {
        (Some(left), Some(right)) => right.cmp(left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    ordered
        .into_iter()
        .take(limit)
        .map(|(_, user)| RecentUser {
            id: user.id.clone(),
            display_name: non_blank_or(&user.display_name, MISSING_NAME),
            email: non_blank_or(user.email.as_deref().unwrap_or_default(), MISSING_FIELD),
            created_at: non_blank_or(user.created_at.as_deref().unwrap_or_default(), MISSING_FIELD),
            role: user.role.clone(),
        })
        .collect()
}

fn non_blank_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::users::{UserSource, DEFAULT_ROLE};

    fn article(record: serde_json::Value) -> Article {
        Article::from_record("a", record).expect("article record")
    }

    fn user(id: &str, created_at: Option<&str>) -> DashboardUser {
        DashboardUser {
            id: id.to_string(),
            display_name: format!("User {id}"),
            email: Some(format!("{id}@example.com")),
            role: DEFAULT_ROLE.to_string(),
            created_at: created_at.map(str::to_string),
            last_sign_in_at: None,
            email_verified: false,
            source: UserSource::Directory,
        }
    }

    fn count_of(entries: &[CountEntry], name: &str) -> u64 {
        entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    #[test]
    fn generic_category_wins_over_tag_string() {
        let tables = frequency_tables(&[article(json!({ "category": "Sport", "tag": "a,b" }))]);
        assert_eq!(tables.categories, vec![CountEntry {
            name: "Sport".to_string(),
            count: 1
        }]);
        assert!(tables.tags.is_empty());
    }

    #[test]
    fn explicit_category_wins_over_generic_one() {
        let classification = classify_article(&article(json!({
            "articleCategory": "  Tech ",
            "category": "Sport",
        })));
        assert_eq!(classification.category, "Tech");
    }

    #[test]
    fn tag_string_supplies_category_and_tags() {
        let tables = frequency_tables(&[article(json!({ "tag": "Politics, economy" }))]);
        assert_eq!(count_of(&tables.categories, "Politics"), 1);
        assert_eq!(count_of(&tables.tags, "Politics"), 1);
        assert_eq!(count_of(&tables.tags, "economy"), 1);
        assert_eq!(tables.categories.len(), 1);
    }

    #[test]
    fn blank_fields_fall_through_to_uncategorized() {
        let tables = frequency_tables(&[
            article(json!({ "category": "   ", "tag": " , ," })),
            article(json!({})),
        ]);
        assert_eq!(tables.categories, vec![CountEntry {
            name: UNCATEGORIZED.to_string(),
            count: 2
        }]);
        assert!(tables.tags.is_empty());
    }

    #[test]
    fn every_article_contributes_exactly_one_category() {
        let articles = vec![
            article(json!({ "category": "Sport" })),
            article(json!({ "tag": "Sport,Local" })),
            article(json!({ "articleCategory": "World", "tag": "x" })),
            article(json!({ "tag": "" })),
        ];
        let tables = frequency_tables(&articles);
        let total: u64 = tables.categories.iter().map(|entry| entry.count).sum();
        assert_eq!(total, articles.len() as u64);
        assert_eq!(tables.categories[0], CountEntry {
            name: "Sport".to_string(),
            count: 2
        });
    }

    #[test]
    fn totals_treat_missing_counters_as_zero() {
        let totals = article_totals(&[
            article(json!({ "views": 10, "upvote": 2, "shared": 1, "sensitiveTags": ["gore"] })),
            article(json!({ "title": "no counters" })),
            article(json!({ "views": "5", "likeCount": 1, "sensitiveTags": [] })),
        ]);
        assert_eq!(totals, ArticleTotals {
            total_articles: 3,
            total_views: 15,
            total_likes: 3,
            total_shares: 1,
            sensitive_count: 1,
        });
    }

    #[test]
    fn histogram_has_twelve_ordered_buckets_across_year_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap();
        let users = vec![
            user("jan", Some("2026-01-15T10:00:00Z")),
            user("mar-last-year", Some("2025-03-01")),
            user("feb-last-year", Some("2025-02-28")),
            user("now", Some(&now.timestamp_millis().to_string())),
            user("garbage", Some("someday")),
            user("missing", None),
        ];
        let histogram = registration_histogram(&users, now);

        assert_eq!(histogram.len(), 12);
        assert_eq!(histogram[0].month, "2025-03");
        assert_eq!(histogram[0].label, "Mar 2025");
        assert_eq!(histogram[11].month, "2026-02");
        assert_eq!(histogram[0].count, 1);
        assert_eq!(histogram[10].count, 1);
        assert_eq!(histogram[11].count, 1);
        assert_eq!(histogram.iter().map(|bucket| bucket.count).sum::<u64>(), 3);
    }

    #[test]
    fn histogram_sums_to_parseable_users_inside_window() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        let users = (1..=9)
            .map(|month| user(&format!("u{month}"), Some(&format!("2026-{month:02}-03"))))
            .chain(std::iter::once(user("bad", Some("not a date"))))
            .collect::<Vec<_>>();
        let histogram = registration_histogram(&users, now);
        assert_eq!(histogram.iter().map(|bucket| bucket.count).sum::<u64>(), 9);
        assert!(histogram.windows(2).all(|pair| pair[0].month < pair[1].month));
    }

    #[test]
    fn recent_users_are_newest_first_with_defaults() {
        let mut no_email = user("c", Some("2026-03-01"));
        no_email.email = None;
        no_email.display_name = "  ".to_string();
        let users = vec![
            user("a", Some("2026-01-01")),
            user("b", None),
            no_email,
            user("d", Some("2025-12-31")),
        ];
        let recent = recent_users(&users, 3);

        let ids = recent.iter().map(|user| user.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["c", "a", "d"]);
        assert_eq!(recent[0].display_name, "Unknown User");
        assert_eq!(recent[0].email, "N/A");

        let all = recent_users(&users, RECENT_USER_LIMIT);
        assert_eq!(all.last().map(|user| user.created_at.as_str()), Some("N/A"));
    }
}
