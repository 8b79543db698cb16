//! Provider catalogue: which web chat services exist, how they authenticate,
//! and which model names route to them.

use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";

pub const GEMINI_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-pro",
    "gemini-2.0-flash",
    "gemini-2.0-flash-thinking",
];
pub const CLAUDE_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
];

/// A browser-authenticated chat web service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Claude,
}

impl Provider {
    pub fn all() -> &'static [Provider] {
        &[Self::Gemini, Self::Claude]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Claude => "claude",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "claude" => Some(Self::Claude),
            _ => None,
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://gemini.google.com",
            Self::Claude => "https://claude.ai",
        }
    }

    /// Domain suffix under which the browser stores this provider's session cookies.
    pub fn cookie_domain(&self) -> &'static str {
        match self {
            Self::Gemini => "google.com",
            Self::Claude => "claude.ai",
        }
    }

    /// Cookie names that must all be present for a usable session.
    pub fn required_cookies(&self) -> &'static [&'static str] {
        match self {
            Self::Gemini => &["__Secure-1PSID", "__Secure-1PSIDTS"],
            Self::Claude => &["sessionKey"],
        }
    }

    /// Key in the `[Cookies]` config section holding the given cookie.
    pub fn config_cookie_key(&self, cookie: &str) -> Option<&'static str> {
        match (self, cookie) {
            (Self::Gemini, "__Secure-1PSID") => Some("gemini_cookie_1PSID"),
            (Self::Gemini, "__Secure-1PSIDTS") => Some("gemini_cookie_1PSIDTS"),
            (Self::Claude, "sessionKey") => Some("claude_cookie"),
            _ => None,
        }
    }

    /// Key in the `[AI]` section holding this provider's default model.
    pub fn default_model_key(&self) -> &'static str {
        match self {
            Self::Gemini => "default_model_gemini",
            Self::Claude => "default_model_claude",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => DEFAULT_GEMINI_MODEL,
            Self::Claude => DEFAULT_CLAUDE_MODEL,
        }
    }

    pub fn models(&self) -> &'static [&'static str] {
        match self {
            Self::Gemini => GEMINI_MODELS,
            Self::Claude => CLAUDE_MODELS,
        }
    }

    /// Route a model name to its provider by prefix.
    pub fn for_model(model: &str) -> Option<Self> {
        let model = model.trim().to_lowercase();
        if model.starts_with("gemini") {
            Some(Self::Gemini)
        } else if model.starts_with("claude") {
            Some(Self::Claude)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_routing() {
        assert_eq!(Provider::for_model("gemini-2.5-pro"), Some(Provider::Gemini));
        assert_eq!(Provider::for_model("Claude-3-5-haiku"), Some(Provider::Claude));
        assert_eq!(Provider::for_model("gpt-4o"), None);
    }

    #[test]
    fn test_every_required_cookie_has_config_key() {
        for provider in Provider::all() {
            for cookie in provider.required_cookies() {
                assert!(
                    provider.config_cookie_key(cookie).is_some(),
                    "{} / {}",
                    provider,
                    cookie
                );
            }
        }
    }

    #[test]
    fn test_default_models_are_listed() {
        for provider in Provider::all() {
            assert!(provider.models().contains(&provider.default_model()));
            assert_eq!(Provider::for_model(provider.default_model()), Some(*provider));
        }
    }
}
