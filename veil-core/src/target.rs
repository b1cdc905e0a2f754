//! Target URL validation

use crate::InvalidTargetError;
use std::fmt;
use url::Url;

/// An http(s) URL that probes are sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl(Url);

impl TargetUrl {
    /// Accept only URLs that begin with `http://` or `https://`
    pub fn parse(raw: &str) -> Result<Self, InvalidTargetError> {
        let trimmed = raw.trim();
        let lowered = trimmed.to_ascii_lowercase();
        if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
            return Err(InvalidTargetError::new(
                raw,
                "must start with http:// or https://",
            ));
        }

        let url = Url::parse(trimmed).map_err(|e| InvalidTargetError::new(raw, e.to_string()))?;
        if url.host_str().is_none() {
            return Err(InvalidTargetError::new(raw, "missing host"));
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn is_https(&self) -> bool {
        self.0.scheme() == "https"
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
