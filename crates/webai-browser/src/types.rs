//! Browser identities and cookie-jar errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Desktop browsers whose cookie stores can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Firefox,
    Chrome,
    Chromium,
    Brave,
    Edge,
}

impl Browser {
    pub fn all() -> &'static [Browser] {
        &[
            Self::Firefox,
            Self::Chrome,
            Self::Chromium,
            Self::Brave,
            Self::Edge,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Firefox => "firefox",
            Self::Chrome => "chrome",
            Self::Chromium => "chromium",
            Self::Brave => "brave",
            Self::Edge => "edge",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "firefox" => Some(Self::Firefox),
            "chrome" | "google-chrome" => Some(Self::Chrome),
            "chromium" => Some(Self::Chromium),
            "brave" => Some(Self::Brave),
            "edge" | "msedge" => Some(Self::Edge),
            _ => None,
        }
    }

    /// Parse a `[Browser] name` config value.
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_name(name).ok_or_else(|| CookieError::UnsupportedBrowser(name.trim().to_string()))
    }

    /// Whether this browser uses the Chromium cookie schema.
    pub fn is_chromium_family(&self) -> bool {
        !matches!(self, Self::Firefox)
    }
}

impl std::fmt::Display for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Error, Debug)]
pub enum CookieError {
    #[error("Browser '{0}' is not supported for cookie extraction")]
    UnsupportedBrowser(String),

    #[error("No cookie database found for {0}")]
    BrowserNotFound(Browser),

    #[error("No cookies for {domain} found in {browser}")]
    CookieNotPresent { browser: Browser, domain: String },

    #[error("Cookie database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CookieError> for webai_core::Error {
    fn from(err: CookieError) -> Self {
        webai_core::Error::CredentialsUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CookieError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_browsers() {
        for browser in Browser::all() {
            assert_eq!(Browser::parse(browser.name()).unwrap(), *browser);
        }
        assert_eq!(Browser::parse(" Firefox ").unwrap(), Browser::Firefox);
    }

    #[test]
    fn test_safari_is_unsupported() {
        let err = Browser::parse("safari").unwrap_err();
        assert!(matches!(err, CookieError::UnsupportedBrowser(ref name) if name == "safari"));
    }

    #[test]
    fn test_cookie_errors_become_credentials_unavailable() {
        let err: webai_core::Error = CookieError::BrowserNotFound(Browser::Chrome).into();
        assert_eq!(err.code(), "credentials_unavailable");
    }
}
