//! Prismic content API client factory.
//!
//! Construction never fails loudly: a bad endpoint or client setup is logged
//! and the caller gets `None`, the same as when the content API is not
//! configured at all.

use axum::http::{header::COOKIE, HeaderMap};
use reqwest::Client;
use tracing::{error, info};
use url::Url;

/// Cookie Prismic sets while an editor previews unpublished content.
pub const PREVIEW_COOKIE: &str = "io.prismic.preview";

/// A configured content API client.
#[derive(Debug, Clone)]
pub struct ContentClient {
    http: Client,
    endpoint: Url,
    access_token: Option<String>,
    preview_ref: Option<String>,
}

/// Build a client for `endpoint`.
///
/// `request` is the incoming request's headers when the client is created
/// while serving one; its preview cookie, if any, is carried along.
pub fn create_content_client(
    request: Option<&HeaderMap>,
    endpoint: Option<&str>,
    access_token: Option<&str>,
) -> Option<ContentClient> {
    match ContentClient::new(request, endpoint, access_token) {
        Ok(client) => {
            info!(
                endpoint = %client.endpoint,
                has_access_token = client.access_token.is_some(),
                has_preview_ref = client.preview_ref.is_some(),
                "content_client_created"
            );
            Some(client)
        }
        Err(e) => {
            error!(error = %e, "content_client_create_failed");
            None
        }
    }
}

impl ContentClient {
    fn new(
        request: Option<&HeaderMap>,
        endpoint: Option<&str>,
        access_token: Option<&str>,
    ) -> anyhow::Result<Self> {
        let endpoint = endpoint
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| anyhow::anyhow!("content endpoint is not configured"))?;

        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!("unsupported content endpoint scheme: {}", endpoint.scheme());
        }

        let http = Client::builder().gzip(true).build()?;

        Ok(Self {
            http,
            endpoint,
            access_token: access_token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            preview_ref: request.and_then(preview_ref),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn preview_ref(&self) -> Option<&str> {
        self.preview_ref.as_deref()
    }

    /// Fetch the API root document (refs, types, forms).
    ///
    /// A preview ref taken from the request context is sent as `ref`.
    pub async fn fetch_api(&self) -> anyhow::Result<serde_json::Value> {
        let mut request = self.http.get(self.endpoint.clone());
        if let Some(token) = &self.access_token {
            request = request.query(&[("access_token", token)]);
        }
        if let Some(preview) = &self.preview_ref {
            request = request.query(&[("ref", preview)]);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Extract the preview ref from the request's `Cookie` headers.
fn preview_ref(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == PREVIEW_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
