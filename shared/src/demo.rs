//! Placeholder dataset for demo mode.
//!
//! Every record is marked: ids start with `demo-`, emails use the reserved
//! `example.invalid` domain and users carry [`UserSource::Demo`].

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::{
    article::Article,
    timestamp::format_timestamp,
    users::{DashboardUser, UserSource},
};

const DEMO_USERS: &[(&str, &str, i64)] = &[
    ("Demo Editor", "admin", 3),
    ("Demo Reporter", "editor", 18),
    ("Demo Reader One", "user", 45),
    ("Demo Reader Two", "user", 80),
    ("Demo Reader Three", "user", 120),
    ("Demo Columnist", "editor", 170),
    ("Demo Reader Four", "user", 230),
    ("Demo Reader Five", "user", 300),
];

const DEMO_ARTICLES: &[(&str, &str, u64, u64, u64, bool)] = &[
    ("demo-article-1", "Politics, economy", 420, 31, 12, false),
    ("demo-article-2", "Sport, football", 310, 22, 5, false),
    ("demo-article-3", "Technology, ai", 275, 40, 18, false),
    ("demo-article-4", "Culture", 150, 9, 2, false),
    ("demo-article-5", "World, conflict", 198, 4, 7, true),
    ("demo-article-6", "Politics, elections", 88, 6, 1, false),
];

/// Placeholder users registered at fixed offsets before `now`.
pub fn demo_users(now: DateTime<Utc>) -> Vec<DashboardUser> {
    DEMO_USERS
        .iter()
        .enumerate()
        .map(|(index, (name, role, days_ago))| {
            let number = index + 1;
            DashboardUser {
                id: format!("demo-user-{number}"),
                display_name: (*name).to_string(),
                email: Some(format!("demo{number}@example.invalid")),
                role: (*role).to_string(),
                created_at: Some(format_timestamp(now - Duration::days(*days_ago))),
                last_sign_in_at: None,
                email_verified: false,
                source: UserSource::Demo,
            }
        })
        .collect()
}

/// Placeholder published articles.
pub fn demo_articles() -> Vec<Article> {
    DEMO_ARTICLES
        .iter()
        .filter_map(|(id, tag, views, likes, shares, sensitive)| {
            let sensitive_tags = if *sensitive { json!(["violence"]) } else { json!([]) };
            Article::from_record(
                *id,
                json!({
                    "title": format!("Placeholder story {id}"),
                    "status": "accepted",
                    "tag": tag,
                    "views": views,
                    "upvote": likes,
                    "shared": shares,
                    "sensitiveTags": sensitive_tags,
                }),
            )
        })
        .collect()
}
