use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder};
use tracing::{debug, warn};

use super::traits::{PackageSource, PackageStream};
use crate::config::InstallerConfig;
use crate::error::{InstallError, Result};

/// Build the shared HTTP client: user agent, default `Accept`, connect timeout.
pub fn build_client(config: &InstallerConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .connect_timeout(config.connect_timeout())
        .build()
        .map_err(|e| InstallError::Network(format!("build http client: {}", e)))
}

/// Streams installer packages over HTTP(S).
pub struct HttpPackageSource {
    client: Client,
    headers: Arc<RwLock<HashMap<String, String>>>,
}

impl HttpPackageSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            headers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the extra request headers (e.g. an auth token for a private mirror).
    pub fn set_headers(&self, headers: HashMap<String, String>) {
        *self.headers.write() = headers;
    }

    fn build_request(&self, url: &str) -> RequestBuilder {
        let headers = self.headers.read().clone();
        let mut req = self.client.get(url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait]
impl PackageSource for HttpPackageSource {
    async fn open(&self, url: &str) -> Result<PackageStream> {
        let resp = self.build_request(url).send().await?;

        let status = resp.status();
        debug!("package request status={} url={}", status.as_u16(), url);
        if !status.is_success() {
            warn!("package request failed status={} url={}", status.as_u16(), url);
            return Err(InstallError::Network(format!(
                "package request failed: HTTP {}",
                status.as_u16()
            )));
        }

        let content_length = resp.content_length();
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(InstallError::from))
            .boxed();

        Ok(PackageStream {
            content_length,
            body,
        })
    }
}
