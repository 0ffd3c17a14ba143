//! Submission strategies.
//!
//! Two interchangeable [`Transport`] implementations:
//!
//! | Strategy | Request | Success |
//! |----------|---------|---------|
//! | [`PatchTransport`] | authenticated `PATCH` with a JSON body | 2xx status |
//! | [`LegacyFormTransport`] | form `POST` with an anti-forgery token and session cookie | 2xx status and no failure marker in the body |
//!
//! Neither retries. Every failure comes back as a [`TransportError`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::COOKIE;
use serde::Serialize;

use crate::client::WikiClient;
use crate::config::{Config, LegacyConfig, TransportStrategy};
use crate::error::{TransportError, TransportErrorKind};
use crate::models::Patch;
use crate::traits::Transport;

#[derive(Debug, Serialize)]
struct PatchBody<'a> {
    #[serde(rename = "commitMessage")]
    commit_message: &'a str,
    subject: SubjectBody<'a>,
}

#[derive(Debug, Serialize)]
struct SubjectBody<'a> {
    infobox: &'a str,
    #[serde(rename = "metaTags")]
    meta_tags: &'a [String],
    #[serde(flatten)]
    flags: &'a BTreeMap<String, bool>,
}

/// Structured `PATCH` against the item endpoint.
pub struct PatchTransport {
    client: WikiClient,
}

impl PatchTransport {
    pub fn new(client: WikiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for PatchTransport {
    fn name(&self) -> &str {
        "patch"
    }

    async fn submit(&self, id: &str, patch: &Patch) -> Result<(), TransportError> {
        let body = PatchBody {
            commit_message: &patch.message,
            subject: SubjectBody {
                infobox: &patch.text,
                meta_tags: &patch.tags,
                flags: &patch.flags,
            },
        };

        let response = self
            .client
            .request(reqwest::Method::PATCH, &self.client.subject_url(id))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::http(status.as_u16(), &text));
        }
        tracing::debug!(id, status = status.as_u16(), "patch accepted");
        Ok(())
    }
}

/// Form post against the legacy edit page.
///
/// The server answers 200 even when it refuses an edit, so success is
/// inferred from the absence of `failure_marker` in the response body.
pub struct LegacyFormTransport {
    http: reqwest::Client,
    base_url: String,
    edit_path: String,
    formhash: String,
    cookie: Option<String>,
    failure_marker: String,
}

impl LegacyFormTransport {
    pub fn new(
        base_url: &str,
        edit_path: &str,
        formhash: &str,
        cookie: Option<String>,
        failure_marker: &str,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            edit_path: edit_path.to_string(),
            formhash: formhash.to_string(),
            cookie,
            failure_marker: failure_marker.to_string(),
        })
    }

    pub fn from_config(legacy: &LegacyConfig, timeout: Duration, user_agent: &str) -> Result<Self> {
        let formhash = legacy.formhash().ok_or_else(|| {
            anyhow::anyhow!(
                "legacy transport needs a form token: set transport.legacy.formhash or ${}",
                legacy.formhash_env
            )
        })?;
        if legacy.cookie().is_none() {
            tracing::warn!(
                cookie_env = %legacy.cookie_env,
                "no session cookie configured for the legacy transport"
            );
        }
        Self::new(
            &legacy.base_url,
            &legacy.edit_path,
            &formhash,
            legacy.cookie(),
            &legacy.failure_marker,
            timeout,
            user_agent,
        )
    }

    pub fn edit_url(&self, id: &str) -> String {
        format!("{}{}", self.base_url, self.edit_path.replace("{id}", id))
    }

    fn form(&self, patch: &Patch) -> Vec<(String, String)> {
        let mut form = vec![
            ("formhash".to_string(), self.formhash.clone()),
            ("subject_infobox".to_string(), patch.text.clone()),
            ("subject_meta_tags".to_string(), patch.tags.join(" ")),
            ("editSummary".to_string(), patch.message.clone()),
        ];
        for (name, value) in &patch.flags {
            form.push((
                format!("subject_{}", name),
                if *value { "1" } else { "0" }.to_string(),
            ));
        }
        form.push(("submit".to_string(), "submit".to_string()));
        form
    }
}

#[async_trait]
impl Transport for LegacyFormTransport {
    fn name(&self) -> &str {
        "legacy"
    }

    async fn submit(&self, id: &str, patch: &Patch) -> Result<(), TransportError> {
        let mut request = self.http.post(self.edit_url(id)).form(&self.form(patch));
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::http(status.as_u16(), &body));
        }
        if !self.failure_marker.is_empty() && body.contains(&self.failure_marker) {
            return Err(TransportError::new(
                TransportErrorKind::Rejected,
                format!("failure marker {:?} found in response", self.failure_marker),
            ));
        }
        tracing::debug!(id, "legacy form accepted");
        Ok(())
    }
}

/// Build the configured strategy. `client` is shared with the item source.
pub fn build_transport(
    config: &Config,
    strategy: TransportStrategy,
    client: &WikiClient,
) -> Result<Arc<dyn Transport>> {
    match strategy {
        TransportStrategy::Patch => Ok(Arc::new(PatchTransport::new(client.clone()))),
        TransportStrategy::Legacy => {
            let legacy = config.transport.legacy.as_ref().ok_or_else(|| {
                anyhow::anyhow!("transport.legacy must be configured to use the legacy transport")
            })?;
            Ok(Arc::new(LegacyFormTransport::from_config(
                legacy,
                Duration::from_secs(config.api.timeout_secs),
                &config.api.user_agent,
            )?))
        }
    }
}
