//! Session credential resolution: config file first, browser cookie jar second.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use webai_browser::{Browser, CookieSource};
use webai_core::config::mask_secret;
use webai_core::{ConfigStore, Error, Provider, Result};

/// Where the resolved cookies came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Config,
    Browser,
    /// Some cookies from config, the rest from the browser.
    Mixed,
}

/// Session cookies for one provider.
#[derive(Clone)]
pub struct Credentials {
    pub provider: Provider,
    pub cookies: BTreeMap<String, String>,
    pub source: CredentialSource,
}

impl Credentials {
    pub fn new(provider: Provider, cookies: BTreeMap<String, String>, source: CredentialSource) -> Self {
        Self {
            provider,
            cookies,
            source,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Value for a `Cookie:` request header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Cookie names with masked values, safe to log or print.
    pub fn masked(&self) -> BTreeMap<String, String> {
        self.cookies
            .iter()
            .map(|(k, v)| (k.clone(), mask_secret(v)))
            .collect()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("cookies", &self.masked())
            .field("source", &self.source)
            .finish()
    }
}

/// Resolves provider credentials without side effects.
///
/// The browser may need to be closed for its cookie store to be readable;
/// that is left to the operator.
#[derive(Clone)]
pub struct CredentialResolver {
    config: Arc<ConfigStore>,
    cookies: Arc<dyn CookieSource>,
}

impl CredentialResolver {
    pub fn new(config: Arc<ConfigStore>, cookies: Arc<dyn CookieSource>) -> Self {
        Self { config, cookies }
    }

    pub fn resolve(&self, provider: Provider) -> Result<Credentials> {
        let required = provider.required_cookies();
        let mut found = BTreeMap::new();

        for name in required {
            if let Some(value) = self.config.cookie(provider, name) {
                found.insert(name.to_string(), value);
            }
        }
        let from_config = found.len();

        let browser_name = self
            .config
            .get_non_empty("Browser", "name")
            .unwrap_or_else(|| "firefox".into());

        if from_config < required.len() {
            debug!(
                "{} of {} {} cookies configured, trying {}",
                from_config,
                required.len(),
                provider,
                browser_name
            );
            let jar = Browser::parse(&browser_name)
                .and_then(|browser| self.cookies.get_cookies(browser, provider.cookie_domain()));
            match jar {
                Ok(jar) => {
                    for name in required {
                        if found.contains_key(*name) {
                            continue;
                        }
                        if let Some(value) = jar.get(*name).filter(|v| !v.trim().is_empty()) {
                            found.insert(name.to_string(), value.clone());
                        }
                    }
                }
                Err(e) => warn!("Browser cookie lookup for {} failed: {}", provider, e),
            }
        }

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !found.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(Error::CredentialsUnavailable(format!(
                "missing {} cookie(s) {}. Log in to {} with {} or set them in the [Cookies] section of {}",
                provider,
                missing.join(", "),
                provider.base_url(),
                browser_name,
                self.config.path().display()
            )));
        }

        let source = if from_config == required.len() {
            CredentialSource::Config
        } else if from_config == 0 {
            CredentialSource::Browser
        } else {
            CredentialSource::Mixed
        };
        let credentials = Credentials::new(provider, found, source);
        info!("Resolved {} credentials from {:?}", provider, source);
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webai_browser::StaticCookieSource;

    fn resolver(ini: &str, jar: StaticCookieSource) -> CredentialResolver {
        let config = Arc::new(ConfigStore::from_ini_str(ini).unwrap());
        CredentialResolver::new(config, Arc::new(jar))
    }

    #[test]
    fn test_config_values_take_precedence() {
        let r = resolver(
            "[Cookies]\nclaude_cookie = sk-config\n",
            StaticCookieSource::new().with_cookie(".claude.ai", "sessionKey", "sk-browser"),
        );
        let creds = r.resolve(Provider::Claude).unwrap();
        assert_eq!(creds.get("sessionKey"), Some("sk-config"));
        assert_eq!(creds.source, CredentialSource::Config);
    }

    #[test]
    fn test_blank_config_falls_back_to_browser() {
        let r = resolver(
            "[Cookies]\nclaude_cookie =\n",
            StaticCookieSource::new().with_cookie(".claude.ai", "sessionKey", "sk-browser"),
        );
        let creds = r.resolve(Provider::Claude).unwrap();
        assert_eq!(creds.get("sessionKey"), Some("sk-browser"));
        assert_eq!(creds.source, CredentialSource::Browser);
    }

    #[test]
    fn test_partial_config_is_completed_from_browser() {
        let r = resolver(
            "[Cookies]\ngemini_cookie_1PSID = psid-config\n",
            StaticCookieSource::new()
                .with_cookie(".google.com", "__Secure-1PSID", "psid-browser")
                .with_cookie(".google.com", "__Secure-1PSIDTS", "psidts-browser"),
        );
        let creds = r.resolve(Provider::Gemini).unwrap();
        assert_eq!(creds.get("__Secure-1PSID"), Some("psid-config"));
        assert_eq!(creds.get("__Secure-1PSIDTS"), Some("psidts-browser"));
        assert_eq!(creds.source, CredentialSource::Mixed);
    }

    #[test]
    fn test_both_sources_empty_is_unavailable() {
        let r = resolver("", StaticCookieSource::new());
        let err = r.resolve(Provider::Gemini).unwrap_err();
        assert_eq!(err.code(), "credentials_unavailable");
        assert!(err.to_string().contains("__Secure-1PSID"));
    }

    #[test]
    fn test_unsupported_browser_counts_as_empty() {
        let r = resolver(
            "[Browser]\nname = safari\n",
            StaticCookieSource::new().with_cookie(".claude.ai", "sessionKey", "sk"),
        );
        let err = r.resolve(Provider::Claude).unwrap_err();
        assert!(matches!(err, Error::CredentialsUnavailable(_)));
    }

    #[test]
    fn test_debug_output_masks_values() {
        let mut cookies = BTreeMap::new();
        cookies.insert("sessionKey".to_string(), "sk-ant-supersecret".to_string());
        let creds = Credentials::new(Provider::Claude, cookies, CredentialSource::Config);
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("supersecret"));
        assert_eq!(creds.cookie_header(), "sessionKey=sk-ant-supersecret");
    }
}
