// src/feeds/http.rs
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use reqwest::{Client, StatusCode};

use super::types::{FrameFetcher, SourceSnapshot};

/// Plain GET of the source URL; anything but 200 with a body is a failure.
#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl FrameFetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceSnapshot) -> Result<Bytes> {
        let rsp = self
            .client
            .get(&source.url)
            .send()
            .await
            .with_context(|| format!("GET {}", source.url))?;

        if rsp.status() != StatusCode::OK {
            return Err(anyhow!("HTTP {} from {}", rsp.status(), source.url));
        }
        let body = rsp.bytes().await.context("reading frame body")?;
        if body.is_empty() {
            return Err(anyhow!("empty body from {}", source.url));
        }
        Ok(body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
