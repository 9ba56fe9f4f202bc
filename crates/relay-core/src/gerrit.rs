//! Gerrit REST client.
//!
//! One client serves all three Gerrit-facing ports: the change query
//! ([`ChangeSource`]), label votes ([`ReviewPoster`]) and the events-log
//! plugin ([`EventsLog`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::error::{RelayError, Result};
use crate::domain::Change;
use crate::query::{ChangeQuery, MaxAge};
use crate::retest::{parse_events, EventsLog, GerritEvent};
use crate::review::{ReviewInput, ReviewPoster};
use crate::source::{collect_pages, ChangeSource};

const USER_AGENT: &str = concat!("gerrit-relay/", env!("CARGO_PKG_VERSION"));

/// Gerrit connection settings
#[derive(Debug, Clone)]
pub struct GerritConfig {
    /// REST API root, e.g. `https://review.example.org/a`
    pub api_url: String,
    /// Events-log plugin endpoint, e.g.
    /// `https://review.example.org/a/plugins/events-log/events`
    pub events_log_url: Option<String>,
    pub username: Option<String>,
    /// HTTP password (not the account password)
    pub password: Option<String>,
}

impl GerritConfig {
    pub fn new(api_url: &str) -> Self {
        GerritConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            events_log_url: None,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_events_log(mut self, url: &str) -> Self {
        self.events_log_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn changes_url(&self) -> String {
        format!("{}/changes/", self.api_url)
    }

    pub fn review_url(&self, change_number: u64, revision: &str) -> String {
        format!(
            "{}/changes/{}/revisions/{}/review",
            self.api_url, change_number, revision
        )
    }
}

/// Gerrit REST client
pub struct GerritClient {
    config: GerritConfig,
    http_client: reqwest::Client,
}

impl GerritClient {
    pub fn new(config: GerritConfig) -> Result<Self> {
        if config.api_url.is_empty() {
            return Err(RelayError::Config("Gerrit API URL is required".to_string()));
        }

        let http_client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(GerritClient {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &GerritConfig {
        &self.config
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_deref()),
            None => request,
        }
    }

    async fn query_page(&self, query: &str, page_size: usize, start: usize) -> Result<String> {
        let url = self.config.changes_url();
        debug!(url = %url, q = %query, n = page_size, start, "querying changes");

        let request = self.http_client.get(&url).query(&[
            ("q", query.to_string()),
            ("o", "CURRENT_REVISION".to_string()),
            ("n", page_size.to_string()),
            ("S", start.to_string()),
        ]);
        let response = self
            .with_auth(request)
            .send()
            .await
            .map_err(|e| RelayError::Query(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Query(e.to_string()))?;
        if !status.is_success() {
            return Err(RelayError::Query(format!(
                "HTTP {} from {url}: {}",
                status.as_u16(),
                body.trim()
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl ChangeSource for GerritClient {
    async fn list_open_changes(
        &self,
        query: &ChangeQuery,
        max_age: Option<&MaxAge>,
        limit: usize,
    ) -> Result<Vec<Change>> {
        let rendered = query.render(max_age);
        let q = rendered.as_str();
        let changes = collect_pages(limit, move |n, start| self.query_page(q, n, start)).await?;

        info!(query = %q, count = changes.len(), "retrieved open changes");
        if changes.len() >= limit {
            info!(limit, "change list reached the query limit; more may remain");
        }
        Ok(changes)
    }
}

#[async_trait]
impl ReviewPoster for GerritClient {
    async fn post_review(
        &self,
        change_number: u64,
        revision: &str,
        review: &ReviewInput,
    ) -> Result<()> {
        if self.config.username.is_none() {
            return Err(RelayError::Config(
                "posting a review requires Gerrit credentials".to_string(),
            ));
        }

        let url = self.config.review_url(change_number, revision);
        debug!(url = %url, "posting review");
        let response = self
            .with_auth(self.http_client.post(&url).json(review))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(change = change_number, revision = %revision, "review posted");
            Ok(())
        } else {
            Err(RelayError::UnexpectedStatus {
                status: status.as_u16(),
                url,
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

/// Events-log window bounds, `yyyy-mm-dd hh:mm:ss` in UTC.
pub fn events_log_query(base: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> String {
    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    format!(
        "{}/?t1={};t2={}",
        base,
        since.format(FORMAT),
        until.format(FORMAT)
    )
}

#[async_trait]
impl EventsLog for GerritClient {
    async fn events_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<GerritEvent>> {
        let base = self
            .config
            .events_log_url
            .as_deref()
            .ok_or_else(|| RelayError::Config("no events-log URL configured".to_string()))?;

        let url = events_log_query(base, since, until);
        debug!(url = %url, "reading events-log");
        let response = self.with_auth(self.http_client.get(&url)).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RelayError::UnexpectedStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let events = parse_events(&body)?;
        info!(count = events.len(), "events-log entries read");
        Ok(events)
    }
}
