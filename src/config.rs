use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Environment variable the binary reads the config file path from.
pub const CONFIG_ENV: &str = "SETUP_ENGINE_CONFIG";

/// Fallback file name for the staged package when the URL has none.
pub const DEFAULT_PACKAGE_FILE_NAME: &str = "installer.exe";

/// Default asset suffix used to pick the installer from a GitHub release.
pub const DEFAULT_ASSET_SUFFIX: &str = ".exe";

pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";

/// Connect timeout for every HTTP request (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Overall timeout for a release metadata request (seconds).
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 10;

/// Maximum wait for the next body chunk before the download is abandoned (seconds).
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 30;

/// Minimum spacing between two progress reports (milliseconds).
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;

/// Extra attempts per release source on network failure.
pub const DEFAULT_RESOLVE_RETRIES: u32 = 2;

/// Write buffer for the package file (1 MB).
pub const WRITE_BUFFER_BYTES: usize = 1024 * 1024;

/// Prefix of per-attempt staging directories.
pub const STAGING_DIR_PREFIX: &str = "setup-engine-";

/// Top-level configuration for the installer engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Version API returning `{"status": "OK", "appVer": "..."}`.
    pub metadata_url: Option<String>,
    /// Download URL built from the version API result; `{version}` is substituted.
    pub download_url_template: Option<String>,
    /// GitHub repository (`owner/name`) whose latest release carries the installer.
    pub github_repo: Option<String>,
    pub github_api_base: String,
    /// Asset name suffix that identifies the installer in a GitHub release.
    pub asset_suffix: String,
    /// Fixed download link, tried after the other sources.
    pub direct_download_url: Option<String>,
    /// Try the direct link before the version API and GitHub.
    pub direct_link_first: bool,
    /// Root for per-attempt staging directories; the OS temp dir when unset.
    pub staging_dir: Option<PathBuf>,
    /// Overrides the file name derived from the download URL.
    pub package_file_name: Option<String>,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
    /// Overall download limit; unlimited when unset.
    pub download_timeout_secs: Option<u64>,
    pub progress_interval_ms: u64,
    pub resolve_retries: u32,
    /// Arguments passed to the installer process.
    pub installer_args: Vec<String>,
    /// Extra headers sent with the package download (e.g. a mirror token).
    pub request_headers: HashMap<String, String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            metadata_url: None,
            download_url_template: None,
            github_repo: None,
            github_api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            asset_suffix: DEFAULT_ASSET_SUFFIX.to_string(),
            direct_download_url: None,
            direct_link_first: false,
            staging_dir: None,
            package_file_name: None,
            user_agent: concat!("setup-engine/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            metadata_timeout_secs: DEFAULT_METADATA_TIMEOUT_SECS,
            chunk_timeout_secs: DEFAULT_CHUNK_TIMEOUT_SECS,
            download_timeout_secs: None,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            resolve_retries: DEFAULT_RESOLVE_RETRIES,
            installer_args: Vec::new(),
            request_headers: HashMap::new(),
        }
    }
}

impl InstallerConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let has_api = self.metadata_url.is_some();
        if has_api && self.download_url_template.is_none() {
            bail!("metadata_url requires download_url_template");
        }
        if let Some(repo) = &self.github_repo {
            if repo.split('/').filter(|p| !p.trim().is_empty()).count() != 2 {
                bail!("github_repo must be owner/name, got {:?}", repo);
            }
        }
        if !has_api && self.github_repo.is_none() && self.direct_download_url.is_none() {
            bail!(
                "no release source configured \
                 (metadata_url, github_repo or direct_download_url)"
            );
        }
        if self.progress_interval_ms == 0 {
            bail!("progress_interval_ms must be > 0");
        }
        if self.chunk_timeout_secs == 0 {
            bail!("chunk_timeout_secs must be > 0");
        }
        Ok(())
    }

    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
