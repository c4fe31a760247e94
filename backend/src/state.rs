use std::sync::Arc;

use anyhow::{Context, Result};
use newsroom_shared::{
    AuthDirectory, DashboardPipeline, Datastore, IdentityToolkitDirectory, RealtimeDatabase,
};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    datastore: Arc<dyn Datastore>,
    dashboard: DashboardPipeline,
    articles_path: Arc<str>,
    public_app_url: Arc<str>,
}

impl AppState {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let datastore: Arc<dyn Datastore> = Arc::new(
            RealtimeDatabase::new(
                &config.datastore_url,
                config.datastore_auth_token.clone(),
                config.http_timeout,
            )
            .context("failed to build datastore client")?,
        );
        let directory: Arc<dyn AuthDirectory> = Arc::new(
            IdentityToolkitDirectory::new(
                &config.auth_api_base,
                &config.auth_project_id,
                config.auth_access_token.clone(),
                config.http_timeout,
            )
            .context("failed to build auth directory client")?,
        );
        Ok(Self::new(datastore, directory, config))
    }

    pub fn new(
        datastore: Arc<dyn Datastore>,
        directory: Arc<dyn AuthDirectory>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            dashboard: DashboardPipeline::new(datastore.clone(), directory, config.dashboard.clone()),
            datastore,
            articles_path: Arc::from(config.dashboard.articles_path.as_str()),
            public_app_url: Arc::from(config.public_app_url.as_str()),
        }
    }

    pub fn datastore(&self) -> Arc<dyn Datastore> {
        self.datastore.clone()
    }

    pub fn dashboard(&self) -> &DashboardPipeline {
        &self.dashboard
    }

    pub fn articles_path(&self) -> &str {
        &self.articles_path
    }

    pub fn public_app_url(&self) -> &str {
        &self.public_app_url
    }
}
