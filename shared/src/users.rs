//! Merging user records from the authentication directory and the legacy
//! profile paths of the datastore.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    directory::DirectoryIdentity,
    keyed_records,
    timestamp::{format_timestamp, timestamp_text},
};

/// Display name used when neither a name nor an email is known.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous User";
/// Role used when no profile assigns one.
pub const DEFAULT_ROLE: &str = "user";

/// Where a merged user record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserSource {
    /// Authentication directory, possibly overlaid with a profile.
    Directory,
    /// Read straight from a legacy profile path.
    Legacy,
    /// Placeholder dataset.
    Demo,
}

/// Supplementary profile stored under one of the legacy user paths.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    /// Preferred display name.
    #[serde(default, deserialize_with = "non_blank_text")]
    pub display_name: Option<String>,
    /// Older profiles stored the display name under `name`.
    #[serde(default, deserialize_with = "non_blank_text")]
    pub name: Option<String>,
    /// Free-text role.
    #[serde(default, deserialize_with = "non_blank_text")]
    pub role: Option<String>,
    /// Email copy kept by old clients. Never overrides the directory.
    #[serde(default, deserialize_with = "non_blank_text")]
    pub email: Option<String>,
    /// Raw registration time.
    #[serde(default)]
    pub created_at: Option<Value>,
}

impl ProfileRecord {
    /// Display name under either key.
    pub fn preferred_name(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.name.as_deref())
    }
}

/// User record presented by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUser {
    /// Directory id, or the legacy path key.
    pub id: String,
    /// Name shown in the dashboard.
    pub display_name: String,
    /// Email, when known.
    pub email: Option<String>,
    /// Free-text role.
    pub role: String,
    /// Registration time as stored. Parsed lazily by the histogram.
    pub created_at: Option<String>,
    /// Most recent sign-in, directory users only.
    pub last_sign_in_at: Option<String>,
    /// Whether the provider verified the email address.
    pub email_verified: bool,
    /// Record origin.
    pub source: UserSource,
}

/// Display name fallback: local part of the email, then a placeholder.
pub fn fallback_display_name(email: Option<&str>) -> String {
    email
        .and_then(|email| email.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
}

/// Maps a directory identity to a dashboard user with default fallbacks.
pub fn normalize_identity(identity: DirectoryIdentity) -> DashboardUser {
    let display_name = identity
        .display_name
        .clone()
        .unwrap_or_else(|| fallback_display_name(identity.email.as_deref()));
    DashboardUser {
        id: identity.id,
        display_name,
        email: identity.email,
        role: DEFAULT_ROLE.to_string(),
        created_at: identity.created_at.map(format_timestamp),
        last_sign_in_at: identity.last_sign_in_at.map(format_timestamp),
        email_verified: identity.email_verified,
        source: UserSource::Directory,
    }
}

/// Decodes the profiles stored under one legacy path.
pub fn profiles_from_snapshot(snapshot: Value) -> Vec<(String, ProfileRecord)> {
    keyed_records(snapshot)
        .into_iter()
        .filter_map(|(id, record)| match serde_json::from_value::<ProfileRecord>(record) {
            Ok(profile) => Some((id, profile)),
            Err(err) => {
                tracing::warn!("skipping malformed user profile {id}: {err}");
                None
            },
        })
        .collect()
}

/// Builds the profile lookup table from legacy path snapshots, in path
/// order. Later paths overwrite earlier ones on id collision.
pub fn profile_lookup<I>(snapshots: I) -> HashMap<String, ProfileRecord>
where
    I: IntoIterator<Item = Value>,
{
    let mut lookup = HashMap::new();
    for snapshot in snapshots {
        lookup.extend(profiles_from_snapshot(snapshot));
    }
    lookup
}

/// Overlays display name and role from `profiles` onto directory users.
///
/// Identity fields (`id`, `email`, `email_verified`) always come from the
/// directory.
pub fn merge_users(
    identities: Vec<DirectoryIdentity>,
    profiles: &HashMap<String, ProfileRecord>,
) -> Vec<DashboardUser> {
    identities
        .into_iter()
        .map(|identity| {
            let mut user = normalize_identity(identity);
            if let Some(profile) = profiles.get(&user.id) {
                if let Some(name) = profile.preferred_name() {
                    user.display_name = name.to_string();
                }
                if let Some(role) = profile.role.as_deref() {
                    user.role = role.to_string();
                }
            }
            user
        })
        .collect()
}

/// Reads users straight from a legacy profile snapshot. Missing
/// registration times become `now`.
pub fn legacy_users(snapshot: Value, now: DateTime<Utc>) -> Vec<DashboardUser> {
    profiles_from_snapshot(snapshot)
        .into_iter()
        .map(|(id, profile)| {
            let display_name = profile
                .preferred_name()
                .map(str::to_string)
                .unwrap_or_else(|| fallback_display_name(profile.email.as_deref()));
            let created_at = profile
                .created_at
                .as_ref()
                .and_then(timestamp_text)
                .unwrap_or_else(|| format_timestamp(now));
            DashboardUser {
                id,
                display_name,
                email: profile.email,
                role: profile.role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
                created_at: Some(created_at),
                last_sign_in_at: None,
                email_verified: false,
                source: UserSource::Legacy,
            }
        })
        .collect()
}

fn non_blank_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(raw) => Some(raw.trim().to_string()).filter(|value| !value.is_empty()),
        _ => None,
    })
}
