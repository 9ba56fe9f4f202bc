//! GitHub Actions repository variables as a [`VariableStore`].
//!
//! `variables_url` is the collection endpoint, e.g.
//! `https://api.github.com/repos/<owner>/<repo>/actions/variables`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StateError;
use crate::storage_traits::{StateResult, VariableStore};

const USER_AGENT: &str = concat!("gerrit-relay/", env!("CARGO_PKG_VERSION"));

/// Connection settings for the GitHub variables API
#[derive(Debug, Clone)]
pub struct GithubVariablesConfig {
    /// Collection URL; a trailing slash is tolerated
    pub variables_url: String,
    /// Personal access token with `actions:write` on the repository
    pub token: String,
}

impl GithubVariablesConfig {
    pub fn new(variables_url: &str, token: &str) -> Self {
        GithubVariablesConfig {
            variables_url: variables_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// URL of one named variable.
    pub fn variable_url(&self, name: &str) -> String {
        format!("{}/{}", self.variables_url, name)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VariableBody {
    name: String,
    value: String,
}

/// Variable store backed by the GitHub REST API
pub struct GithubVariableStore {
    config: GithubVariablesConfig,
    http_client: reqwest::Client,
}

impl GithubVariableStore {
    pub fn new(config: GithubVariablesConfig) -> StateResult<Self> {
        if config.variables_url.is_empty() {
            return Err(StateError::Configuration(
                "variables URL must not be empty".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;

        Ok(GithubVariableStore {
            config,
            http_client,
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(&self.config.token)
    }

    async fn unexpected(url: &str, response: reqwest::Response) -> StateError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StateError::UnexpectedStatus {
            status,
            url: url.to_string(),
            body,
        }
    }
}

#[async_trait]
impl VariableStore for GithubVariableStore {
    async fn read(&self, name: &str) -> StateResult<Option<String>> {
        let url = self.config.variable_url(name);
        debug!(url = %url, "reading repository variable");

        let response = self.request(reqwest::Method::GET, &url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: VariableBody = response.json().await?;
                Ok(Some(body.value))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(&url, response).await),
        }
    }

    async fn write(&self, name: &str, value: &str) -> StateResult<()> {
        let body = VariableBody {
            name: name.to_string(),
            value: value.to_string(),
        };

        let url = self.config.variable_url(name);
        debug!(url = %url, "updating repository variable");
        let response = self
            .request(reqwest::Method::PATCH, &url)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => {
                // Variable does not exist yet; create it.
                let url = self.config.variables_url.clone();
                debug!(url = %url, "creating repository variable");
                let response = self
                    .request(reqwest::Method::POST, &url)
                    .json(&body)
                    .send()
                    .await?;
                if response.status() == StatusCode::CREATED {
                    Ok(())
                } else {
                    Err(Self::unexpected(&url, response).await)
                }
            }
            _ => Err(Self::unexpected(&url, response).await),
        }
    }
}
