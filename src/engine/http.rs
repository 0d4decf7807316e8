//! Out-of-band replay of captured API writes.
//!
//! An `api-request` command re-issues a write the page's scripts made
//! at record time. The request is rebuilt from the command's method,
//! body and headers, layered over the cached authorization context the
//! bridge harvested from an observed read.

use tracing::{debug, info};

use crate::capture::AuthContext;
use crate::command::Command;
use crate::{Error, Result};

/// Hop-by-hop and derived headers that must not be replayed verbatim.
const SKIPPED_HEADERS: &[&str] = &["content-length", "host", "connection"];

pub(crate) struct ApiClient {
    client: reqwest::Client,
}

impl ApiClient {
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Send the request; non-2xx statuses and transport failures are
    /// both [`Error::Network`]. Returns the parsed JSON body when the
    /// response carries one.
    pub(crate) async fn execute(
        &self,
        cmd: &Command,
        auth: Option<&AuthContext>,
    ) -> Result<Option<serde_json::Value>> {
        let url = if !cmd.target.is_empty() {
            cmd.target.clone()
        } else {
            auth.map(|a| a.url.clone()).ok_or_else(|| {
                Error::Network("api-request has no target url and no cached context".into())
            })?
        };

        let method_name = cmd.method.as_deref().unwrap_or("POST").to_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes())
            .map_err(|_| Error::Network(format!("invalid http method '{method_name}'")))?;

        let mut request = self.client.request(method, &url);
        if let Some(auth) = auth {
            for (name, value) in &auth.headers {
                if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                    continue;
                }
                request = request.header(name.as_str(), value.as_str());
            }
        }
        // Command headers win over the cached context.
        for (name, value) in &cmd.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !cmd.value.is_empty() {
            request = request.body(cmd.value.clone());
        }

        info!(%url, method = method_name.as_str(), "api request");
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Network(format!(
                "request to {url} failed with status {status}"
            )));
        }
        debug!(status = status.as_u16(), bytes = body.len(), "api response");
        Ok(serde_json::from_str(&body).ok())
    }
}
