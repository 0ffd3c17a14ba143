//! HTTP client for the wiki API.
//!
//! Implements [`ItemSource`] over two endpoints:
//!
//! - `GET {base}/p1/wiki/subjects/{id}`: name, key-value text (`infobox`),
//!   tags (`metaTags`) and every boolean top-level field as a flag.
//! - `GET {base}/p1/wiki/subjects/{id}/history-summary`: edit history, most
//!   recent first, with unix-second timestamps.
//!
//! Every request carries the bearer credential. Non-2xx answers become
//! [`TransportErrorKind::Http`](crate::error::TransportErrorKind::Http)
//! errors with the response body as detail.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ApiConfig;
use crate::error::{TransportError, TransportErrorKind};
use crate::models::{HistoryEntry, ItemState};
use crate::traits::ItemSource;

#[derive(Debug, Deserialize)]
struct SubjectWire {
    #[serde(default)]
    name: String,
    #[serde(default)]
    infobox: String,
    #[serde(default, rename = "metaTags")]
    meta_tags: Vec<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryWire {
    #[serde(rename = "createdAt")]
    created_at: i64,
    #[serde(default)]
    creator: Option<CreatorWire>,
    #[serde(default, rename = "commitMessage")]
    commit_message: String,
}

#[derive(Debug, Deserialize)]
struct CreatorWire {
    #[serde(default)]
    username: String,
}

/// Authenticated client for the structured API. Cheap to clone.
#[derive(Clone)]
pub struct WikiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl WikiClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn from_config(api: &ApiConfig, token: &str) -> Result<Self> {
        Self::new(
            &api.base_url,
            token,
            Duration::from_secs(api.timeout_secs),
            &api.user_agent,
        )
    }

    pub fn subject_url(&self, id: &str) -> String {
        format!("{}/p1/wiki/subjects/{}", self.base_url, id)
    }

    /// A request builder with credentials attached.
    pub fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransportError> {
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::http(status.as_u16(), &body));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ItemSource for WikiClient {
    async fn fetch_item(&self, id: &str) -> Result<ItemState, TransportError> {
        let wire: SubjectWire = self.get_json(&self.subject_url(id)).await?;
        tracing::debug!(id, name = %wire.name, "fetched item");
        Ok(item_from_wire(id, wire, Utc::now()))
    }

    async fn fetch_history(&self, id: &str) -> Result<Vec<HistoryEntry>, TransportError> {
        let url = format!("{}/history-summary", self.subject_url(id));
        let wire: Vec<HistoryWire> = self.get_json(&url).await?;
        wire.into_iter().map(history_from_wire).collect()
    }
}

fn item_from_wire(id: &str, wire: SubjectWire, fetched_at: DateTime<Utc>) -> ItemState {
    let mut tags: Vec<String> = Vec::with_capacity(wire.meta_tags.len());
    for tag in wire.meta_tags {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let flags: BTreeMap<String, bool> = wire
        .rest
        .iter()
        .filter_map(|(key, value)| value.as_bool().map(|b| (key.to_lowercase(), b)))
        .collect();

    ItemState {
        id: id.to_string(),
        name: wire.name,
        text: wire.infobox,
        tags,
        flags,
        fetched_at,
    }
}

fn history_from_wire(wire: HistoryWire) -> Result<HistoryEntry, TransportError> {
    let created_at = DateTime::from_timestamp(wire.created_at, 0).ok_or_else(|| {
        TransportError::new(
            TransportErrorKind::Decode,
            format!("history timestamp out of range: {}", wire.created_at),
        )
    })?;
    Ok(HistoryEntry {
        created_at,
        creator: wire.creator.map(|c| c.username).unwrap_or_default(),
        commit_message: wire.commit_message,
    })
}
