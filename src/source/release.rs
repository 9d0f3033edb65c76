use std::fmt;

/// Expected digest of an installer package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    /// Lowercase hex SHA-256.
    Sha256(String),
}

impl Checksum {
    /// Accepts `sha256:<hex>` or a bare 64-char hex digest, any case.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let hex = match value.split_once(':') {
            Some((algo, hex)) if algo.eq_ignore_ascii_case("sha256") => hex,
            Some(_) => return None,
            None => value,
        };
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self::Sha256(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Sha256(_) => "sha256",
        }
    }

    pub fn expected_hex(&self) -> &str {
        match self {
            Self::Sha256(hex) => hex,
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm(), self.expected_hex())
    }
}

/// The latest published installer, as resolved from a release source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    pub version: String,
    pub download_url: String,
    pub expected_size: Option<u64>,
    pub checksum: Option<Checksum>,
}

impl ReleaseDescriptor {
    pub fn new(version: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            download_url: download_url.into(),
            expected_size: None,
            checksum: None,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Last non-empty path segment of the download URL, if it looks like a file name.
    pub fn file_name(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.download_url).ok()?;
        let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
        if segment.contains('.') {
            Some(segment.to_string())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08";

    #[test]
    fn checksum_parse_forms() {
        let bare = Checksum::parse(HEX).unwrap();
        let prefixed = Checksum::parse(&format!("sha256:{}", HEX)).unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(bare.expected_hex(), HEX.to_ascii_lowercase());
        assert_eq!(bare.to_string(), format!("sha256:{}", HEX.to_ascii_lowercase()));

        assert!(Checksum::parse("md5:abcd").is_none());
        assert!(Checksum::parse("xyz").is_none());
        assert!(Checksum::parse(&HEX[..63]).is_none());
    }

    #[test]
    fn file_name_from_url() {
        let d = ReleaseDescriptor::new(
            "2.0.0",
            "https://github.com/acme/app/releases/download/2.0.0/App.Setup.2.0.0.exe",
        );
        assert_eq!(d.file_name().as_deref(), Some("App.Setup.2.0.0.exe"));

        let d = ReleaseDescriptor::new("latest", "https://lfs.example.com/download");
        assert!(d.file_name().is_none());
    }
}
