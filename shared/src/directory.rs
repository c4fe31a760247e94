//! Authentication directory collaborator.
//!
//! The identity provider owns accounts; this service only lists them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::timestamp::parse_timestamp_str;

/// Upper bound on identities fetched for one dashboard build.
pub const DEFAULT_MAX_IDENTITIES: usize = 1000;

/// Failure listing identities.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The request never produced a response.
    #[error("directory request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("directory returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, trimmed.
        body: String,
    },
    /// The directory is not configured or is a fake told to fail.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// One account as reported by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryIdentity {
    /// Provider user id.
    pub id: String,
    /// Display name set on the account, if any.
    pub display_name: Option<String>,
    /// Primary email, if any.
    pub email: Option<String>,
    /// Account creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Most recent sign-in.
    pub last_sign_in_at: Option<DateTime<Utc>>,
    /// Whether the provider verified the email address.
    pub email_verified: bool,
}

/// Lists accounts from the identity provider.
#[async_trait]
pub trait AuthDirectory: Send + Sync {
    /// Returns at most `max_results` identities.
    async fn list_identities(
        &self,
        max_results: usize,
    ) -> Result<Vec<DirectoryIdentity>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<ProviderUser>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderUser {
    local_id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    last_login_at: Option<String>,
}

impl From<ProviderUser> for DirectoryIdentity {
    fn from(user: ProviderUser) -> Self {
        Self {
            id: user.local_id,
            display_name: user.display_name.filter(|value| !value.trim().is_empty()),
            email: user.email.filter(|value| !value.trim().is_empty()),
            created_at: user.created_at.as_deref().and_then(parse_timestamp_str),
            last_sign_in_at: user.last_login_at.as_deref().and_then(parse_timestamp_str),
            email_verified: user.email_verified,
        }
    }
}

/// REST client for the identity provider's account listing.
#[derive(Clone)]
pub struct IdentityToolkitDirectory {
    api_base: String,
    project_id: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl IdentityToolkitDirectory {
    /// Builds a client listing accounts of `project_id`.
    pub fn new(
        api_base: &str,
        project_id: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(DirectoryError::Unavailable("project id is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            access_token: access_token.filter(|token| !token.trim().is_empty()),
            client,
        })
    }

    async fn fetch_page(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<BatchGetResponse, DirectoryError> {
        let url = format!("{}/v1/projects/{}/accounts:batchGet", self.api_base, self.project_id);
        let mut request = self
            .client
            .get(url)
            .query(&[("maxResults", page_size.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("nextPageToken", token)]);
        }
        if let Some(token) = self.access_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(response.json::<BatchGetResponse>().await?)
    }
}

#[async_trait]
impl AuthDirectory for IdentityToolkitDirectory {
    async fn list_identities(
        &self,
        max_results: usize,
    ) -> Result<Vec<DirectoryIdentity>, DirectoryError> {
        let mut identities = Vec::new();
        let mut page_token: Option<String> = None;

        while identities.len() < max_results {
            let page_size = (max_results - identities.len()).min(DEFAULT_MAX_IDENTITIES);
            let page = self.fetch_page(page_size, page_token.as_deref()).await?;
            let fetched = page.users.len();
            identities.extend(page.users.into_iter().map(DirectoryIdentity::from));

            page_token = page.next_page_token.filter(|token| !token.is_empty());
            if page_token.is_none() || fetched == 0 {
                break;
            }
        }

        identities.truncate(max_results);
        Ok(identities)
    }
}

/// Fixed identity list, optionally failing. Used by tests and demo wiring.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    identities: Vec<DirectoryIdentity>,
    unavailable: bool,
}

impl StaticDirectory {
    /// Directory returning `identities`.
    pub fn new(identities: Vec<DirectoryIdentity>) -> Self {
        Self {
            identities,
            unavailable: false,
        }
    }

    /// Directory whose every call fails.
    pub fn unavailable() -> Self {
        Self {
            identities: Vec::new(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl AuthDirectory for StaticDirectory {
    async fn list_identities(
        &self,
        max_results: usize,
    ) -> Result<Vec<DirectoryIdentity>, DirectoryError> {
        if self.unavailable {
            return Err(DirectoryError::Unavailable("static directory is offline".to_string()));
        }
        Ok(self.identities.iter().take(max_results).cloned().collect())
    }
}
