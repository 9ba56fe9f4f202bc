//! GitHub Actions workflow-dispatch client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

use crate::dispatch::WorkflowDispatcher;
use crate::domain::error::{RelayError, Result};
use crate::domain::MirrorRef;

const USER_AGENT: &str = concat!("gerrit-relay/", env!("CARGO_PKG_VERSION"));

/// Public GitHub REST root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub connection settings
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_url: String,
    /// `owner/repo` of the repository that holds the CI workflows
    pub repository: String,
    pub token: String,
}

impl GithubConfig {
    pub fn new(api_url: &str, repository: &str, token: &str) -> Self {
        GithubConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.to_string(),
        }
    }

    pub fn dispatch_url(&self, workflow: &str) -> String {
        format!(
            "{}/repos/{}/actions/workflows/{}/dispatches",
            self.api_url, self.repository, workflow
        )
    }
}

#[derive(Debug, Serialize)]
struct DispatchInputs<'a> {
    branch: &'a str,
}

#[derive(Debug, Serialize)]
struct DispatchBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    inputs: DispatchInputs<'a>,
}

/// Workflow dispatcher backed by the GitHub REST API
pub struct GithubDispatcher {
    config: GithubConfig,
    http_client: reqwest::Client,
}

impl GithubDispatcher {
    pub fn new(config: GithubConfig) -> Result<Self> {
        if !config.repository.contains('/') {
            return Err(RelayError::Config(format!(
                "GitHub repository must be owner/name, got {:?}",
                config.repository
            )));
        }

        let http_client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(GithubDispatcher {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl WorkflowDispatcher for GithubDispatcher {
    async fn trigger(&self, workflow: &str, dispatch_ref: &str, mirror: &MirrorRef) -> Result<()> {
        let url = self.config.dispatch_url(workflow);
        let branch = mirror.branch_name();
        let body = DispatchBody {
            git_ref: dispatch_ref,
            inputs: DispatchInputs { branch: &branch },
        };
        debug!(url = %url, branch = %branch, "dispatching workflow");

        let response = self
            .http_client
            .post(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            info!(workflow = %workflow, branch = %branch, "workflow dispatched");
            Ok(())
        } else {
            Err(RelayError::UnexpectedStatus {
                status: response.status().as_u16(),
                url,
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_url() {
        let config = GithubConfig::new("https://api.github.com/", "acme/kernel-ci", "tok");
        assert_eq!(
            config.dispatch_url("test.yml"),
            "https://api.github.com/repos/acme/kernel-ci/actions/workflows/test.yml/dispatches"
        );
    }

    #[test]
    fn test_dispatch_body_wire_format() {
        let branch = MirrorRef::new(1234, 5).branch_name();
        let body = DispatchBody {
            git_ref: "main",
            inputs: DispatchInputs { branch: &branch },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["ref"], "main");
        assert_eq!(v["inputs"]["branch"], "changes/34/1234/5");
    }

    #[test]
    fn test_repository_must_be_qualified() {
        let result = GithubDispatcher::new(GithubConfig::new(DEFAULT_API_URL, "kernel-ci", "t"));
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_http_error() {
        let dispatcher =
            GithubDispatcher::new(GithubConfig::new("http://127.0.0.1:9", "acme/ci", "t")).unwrap();
        let err = dispatcher
            .trigger("ci.yml", "main", &MirrorRef::new(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Http(_)));
    }
}
