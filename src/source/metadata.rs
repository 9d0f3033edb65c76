// Release metadata sources and the fallback chain that tries them in order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::release::{Checksum, ReleaseDescriptor};
use super::traits::ReleaseSource;
use crate::config::InstallerConfig;
use crate::error::{InstallError, Result};

async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    accept: &'static str,
    timeout: Duration,
) -> Result<T> {
    let resp = client
        .get(url)
        .header(ACCEPT, accept)
        .timeout(timeout)
        .send()
        .await?;

    let status = resp.status();
    debug!("metadata request status={} url={}", status.as_u16(), url);
    if status == StatusCode::NOT_FOUND {
        return Err(InstallError::ReleaseNotFound(format!("{} returned HTTP 404", url)));
    }
    if !status.is_success() {
        warn!("metadata request failed status={} url={}", status.as_u16(), url);
        return Err(InstallError::Network(format!(
            "metadata request failed: HTTP {}",
            status.as_u16()
        )));
    }

    resp.json::<T>()
        .await
        .map_err(|e| InstallError::Network(format!("invalid metadata from {}: {}", url, e)))
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "appVer", default)]
    app_ver: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    sha256: Option<String>,
}

/// Version API returning `{"status": "OK", "appVer": "..."}`; the download URL
/// is built from a template.
pub struct ApiReleaseSource {
    client: Client,
    url: String,
    download_url_template: String,
    timeout: Duration,
}

impl ApiReleaseSource {
    pub fn new(
        client: Client,
        url: String,
        download_url_template: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url,
            download_url_template,
            timeout,
        }
    }
}

#[async_trait]
impl ReleaseSource for ApiReleaseSource {
    fn name(&self) -> &str {
        "version-api"
    }

    async fn resolve_latest(&self) -> Result<ReleaseDescriptor> {
        let body: VersionResponse =
            get_json(&self.client, &self.url, "application/json", self.timeout).await?;

        if !body.status.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("ok")) {
            return Err(InstallError::ReleaseNotFound(format!(
                "version api status {:?}",
                body.status
            )));
        }
        let version = body
            .app_ver
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| InstallError::ReleaseNotFound("version api returned no appVer".into()))?;

        let mut descriptor = ReleaseDescriptor::new(
            version.clone(),
            self.download_url_template.replace("{version}", &version),
        );
        if let Some(size) = body.size {
            descriptor = descriptor.with_expected_size(size);
        }
        if let Some(sha) = body.sha256.as_deref() {
            match Checksum::parse(sha) {
                Some(checksum) => descriptor = descriptor.with_checksum(checksum),
                None => warn!("version api returned unparseable sha256 {:?}", sha),
            }
        }
        Ok(descriptor)
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    digest: Option<String>,
}

/// Latest GitHub release; the first asset whose name ends with `asset_suffix`.
pub struct GitHubReleaseSource {
    client: Client,
    api_base: String,
    repo: String,
    asset_suffix: String,
    timeout: Duration,
}

impl GitHubReleaseSource {
    pub fn new(
        client: Client,
        api_base: String,
        repo: String,
        asset_suffix: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_base,
            repo,
            asset_suffix,
            timeout,
        }
    }

    fn latest_url(&self) -> String {
        format!(
            "{}/repos/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.repo
        )
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    fn name(&self) -> &str {
        "github"
    }

    async fn resolve_latest(&self) -> Result<ReleaseDescriptor> {
        let release: GitHubRelease = get_json(
            &self.client,
            &self.latest_url(),
            "application/vnd.github+json",
            self.timeout,
        )
        .await?;

        let suffix = self.asset_suffix.to_ascii_lowercase();
        let asset = release
            .assets
            .into_iter()
            .find(|a| a.name.to_ascii_lowercase().ends_with(&suffix))
            .ok_or_else(|| {
                InstallError::ReleaseNotFound(format!(
                    "release {} has no {} asset",
                    release.tag_name, self.asset_suffix
                ))
            })?;

        debug!("github release {} asset {}", release.tag_name, asset.name);
        let mut descriptor = ReleaseDescriptor::new(release.tag_name, asset.browser_download_url);
        if let Some(size) = asset.size.filter(|s| *s > 0) {
            descriptor = descriptor.with_expected_size(size);
        }
        if let Some(checksum) = asset.digest.as_deref().and_then(Checksum::parse) {
            descriptor = descriptor.with_checksum(checksum);
        }
        Ok(descriptor)
    }
}

/// A fixed download link; always resolves, version is `latest`.
pub struct DirectReleaseSource {
    url: String,
}

impl DirectReleaseSource {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl ReleaseSource for DirectReleaseSource {
    fn name(&self) -> &str {
        "direct"
    }

    async fn resolve_latest(&self) -> Result<ReleaseDescriptor> {
        Ok(ReleaseDescriptor::new("latest", self.url.clone()))
    }
}

/// Tries each source in order; network failures are retried per source.
pub struct FallbackReleaseSource {
    sources: Vec<Arc<dyn ReleaseSource>>,
    retries: u32,
    retry_delay: Duration,
}

impl FallbackReleaseSource {
    pub fn new(sources: Vec<Arc<dyn ReleaseSource>>, retries: u32) -> Self {
        Self {
            sources,
            retries,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Build the configured chain: version API, GitHub, direct link. The
    /// direct link moves to the front when `direct_link_first` is set.
    pub fn from_config(config: &InstallerConfig, client: &Client) -> Self {
        let mut sources: Vec<Arc<dyn ReleaseSource>> = Vec::new();
        if let (Some(url), Some(template)) = (&config.metadata_url, &config.download_url_template) {
            sources.push(Arc::new(ApiReleaseSource::new(
                client.clone(),
                url.clone(),
                template.clone(),
                config.metadata_timeout(),
            )));
        }
        if let Some(repo) = &config.github_repo {
            sources.push(Arc::new(GitHubReleaseSource::new(
                client.clone(),
                config.github_api_base.clone(),
                repo.clone(),
                config.asset_suffix.clone(),
                config.metadata_timeout(),
            )));
        }
        if let Some(url) = &config.direct_download_url {
            let direct = Arc::new(DirectReleaseSource::new(url.clone()));
            if config.direct_link_first {
                sources.insert(0, direct);
            } else {
                sources.push(direct);
            }
        }
        Self::new(sources, config.resolve_retries)
    }

    async fn resolve_with_retry(
        &self,
        source: &Arc<dyn ReleaseSource>,
    ) -> Result<ReleaseDescriptor> {
        let mut attempt = 0u32;
        loop {
            match source.resolve_latest().await {
                Err(InstallError::Network(msg)) if attempt < self.retries => {
                    warn!(
                        "release source {} failed (attempt {}): {}",
                        source.name(),
                        attempt,
                        msg
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl ReleaseSource for FallbackReleaseSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn resolve_latest(&self) -> Result<ReleaseDescriptor> {
        let mut last_network: Option<InstallError> = None;
        let mut last_not_found: Option<InstallError> = None;

        for source in &self.sources {
            match self.resolve_with_retry(source).await {
                Ok(descriptor) => {
                    info!(
                        "resolved release {} from {} url={}",
                        descriptor.version,
                        source.name(),
                        descriptor.download_url
                    );
                    return Ok(descriptor);
                }
                Err(e @ InstallError::ReleaseNotFound(_)) => {
                    warn!("release source {} has no release: {}", source.name(), e);
                    last_not_found = Some(e);
                }
                Err(e) => {
                    warn!("release source {} failed: {}", source.name(), e);
                    last_network = Some(e);
                }
            }
        }

        Err(last_network.or(last_not_found).unwrap_or_else(|| {
            InstallError::ReleaseNotFound("no release source configured".into())
        }))
    }
}
