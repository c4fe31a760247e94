use std::{env, path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use newsroom_shared::{
    dashboard::{DashboardConfig, DEFAULT_ARTICLES_PATH, DEFAULT_LEGACY_USER_PATHS},
    directory::DEFAULT_MAX_IDENTITIES,
};

const DEFAULT_AUTH_API_BASE: &str = "https://identitytoolkit.googleapis.com";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_addr: String,
    pub datastore_url: String,
    pub datastore_auth_token: Option<String>,
    pub auth_api_base: String,
    pub auth_project_id: String,
    pub auth_access_token: Option<String>,
    pub http_timeout: Duration,
    pub public_app_url: String,
    pub log_dir: Option<PathBuf>,
    pub dashboard: DashboardConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub articles_path: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            articles_path: DEFAULT_ARTICLES_PATH.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Host of the datastore URL. Credentials and query never leave here.
    pub fn datastore_host(&self) -> String {
        self.datastore_url
            .parse::<axum::http::Uri>()
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_else(|| "<unparseable url>".to_string())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let port = match var("PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) => port,
                Err(_) => bail!("invalid PORT: {raw}"),
            },
            None => 3000,
        };
        let Some(datastore_url) = var("DATASTORE_URL") else {
            bail!("DATASTORE_URL must be set");
        };
        let Some(auth_project_id) = var("AUTH_PROJECT_ID") else {
            bail!("AUTH_PROJECT_ID must be set");
        };

        let http_timeout = Duration::from_secs(
            var("HTTP_TIMEOUT_SECONDS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30)
                .max(3),
        );
        let interval = Duration::from_secs(
            var("RECONCILE_INTERVAL_SECONDS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60)
                .max(5),
        );
        let articles_path = var("ARTICLES_PATH")
            .map(|value| value.trim_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ARTICLES_PATH.to_string());
        let legacy_user_paths = var("LEGACY_USER_PATHS")
            .map(|raw| parse_path_list(&raw))
            .filter(|paths| !paths.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_LEGACY_USER_PATHS
                    .iter()
                    .map(|path| (*path).to_string())
                    .collect()
            });
        let max_identities = var("DIRECTORY_MAX_USERS")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_IDENTITIES);

        Ok(Self {
            port,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            datastore_url,
            datastore_auth_token: var("DATASTORE_AUTH_TOKEN"),
            auth_api_base: var("AUTH_API_BASE").unwrap_or_else(|| DEFAULT_AUTH_API_BASE.to_string()),
            auth_project_id,
            auth_access_token: var("AUTH_ACCESS_TOKEN"),
            http_timeout,
            public_app_url: var("PUBLIC_APP_URL")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            log_dir: var("LOG_DIR").map(PathBuf::from),
            dashboard: DashboardConfig {
                articles_path: articles_path.clone(),
                legacy_user_paths,
                max_identities,
                demo_mode: var("DASHBOARD_DEMO_MODE")
                    .map(|v| parse_bool_env(&v))
                    .unwrap_or(false),
            },
            reconciler: ReconcilerConfig {
                enabled: var("ENABLE_RECONCILER")
                    .map(|v| parse_bool_env(&v))
                    .unwrap_or(true),
                interval,
                articles_path,
            },
        })
    }
}

fn parse_path_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|path| path.trim().trim_matches('/'))
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool_env(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
