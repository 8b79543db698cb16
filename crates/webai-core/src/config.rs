//! INI configuration store.
//!
//! Settings live in a human-editable file (`config.conf` by default) with the
//! sections `[Browser]`, `[AI]`, `[Cookies]`, `[EnabledAI]`, `[Proxy]` and
//! `[Server]`. Every known key has a built-in default; missing keys are filled
//! on load and unknown keys are left alone.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::provider::{Provider, DEFAULT_CLAUDE_MODEL, DEFAULT_GEMINI_MODEL};

pub const DEFAULT_CONFIG_FILE: &str = "config.conf";
pub const DEFAULT_PORT: u16 = 6969;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_FALLBACK_COMMAND: &str = "g4f api --bind {host}:{port}";

/// Built-in defaults as (section, key, value).
pub const DEFAULTS: &[(&str, &str, &str)] = &[
    ("Browser", "name", "firefox"),
    ("AI", "default_ai", "gemini"),
    ("AI", "default_model_gemini", DEFAULT_GEMINI_MODEL),
    ("AI", "default_model_claude", DEFAULT_CLAUDE_MODEL),
    ("Cookies", "gemini_cookie_1PSID", ""),
    ("Cookies", "gemini_cookie_1PSIDTS", ""),
    ("Cookies", "claude_cookie", ""),
    ("EnabledAI", "gemini", "true"),
    ("EnabledAI", "claude", "false"),
    ("Proxy", "http_proxy", ""),
    ("Server", "host", DEFAULT_HOST),
    ("Server", "port", "6969"),
    ("Server", "request_timeout_secs", "60"),
    ("Server", "max_sessions", "256"),
    ("Server", "session_ttl_secs", "3600"),
    ("Server", "fallback_command", DEFAULT_FALLBACK_COMMAND),
];

fn default_for(section: &str, key: &str) -> Option<&'static str> {
    DEFAULTS
        .iter()
        .find(|(s, k, _)| s.eq_ignore_ascii_case(section) && k.eq_ignore_ascii_case(key))
        .map(|(_, _, v)| *v)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Server-side knobs from the `[Server]` section.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub max_sessions: usize,
    pub session_ttl: Duration,
    pub fallback_command: String,
}

/// Typed snapshot of the configuration at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub browser: String,
    pub default_ai: String,
    pub default_models: BTreeMap<Provider, String>,
    pub enabled: BTreeMap<Provider, bool>,
    pub http_proxy: Option<String>,
    pub server: ServerSettings,
}

impl Settings {
    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.enabled.get(&provider).copied().unwrap_or(false)
    }

    pub fn default_model(&self, provider: Provider) -> String {
        self.default_models
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string())
    }

    /// Provider named by `[AI] default_ai`.
    pub fn default_provider(&self) -> Result<Provider> {
        Provider::from_name(&self.default_ai).ok_or_else(|| {
            Error::Config(format!(
                "Default AI service '{}' in config is not supported",
                self.default_ai
            ))
        })
    }
}

/// Thread-safe, file-backed key/value settings.
pub struct ConfigStore {
    path: PathBuf,
    ini: RwLock<Ini>,
    save_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the config file, filling every missing key with its default.
    /// Creates the file when absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (mut ini, existed) = if path.exists() {
            let ini = Ini::load_from_file(&path)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            (ini, true)
        } else {
            warn!(
                "Config file '{}' not found. Creating a default one.",
                path.display()
            );
            (Ini::new(), false)
        };

        let filled = fill_defaults(&mut ini);

        let store = Self {
            path,
            ini: RwLock::new(ini),
            save_lock: Mutex::new(()),
        };

        if !existed || filled > 0 {
            store.save()?;
        }
        info!("Loaded config from {}", store.path.display());
        Ok(store)
    }

    /// Parse config text without a backing file. `save` becomes a no-op.
    pub fn from_ini_str(text: &str) -> Result<Self> {
        let mut ini = Ini::load_from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        fill_defaults(&mut ini);
        Ok(Self {
            path: PathBuf::new(),
            ini: RwLock::new(ini),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value for `section.key`, falling back to the built-in default.
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        let ini = self.ini.read();
        lookup(&ini, section, key)
            .or_else(|| default_for(section, key).map(str::to_string))
    }

    /// Like [`get`](Self::get) but treats blank values as absent.
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<String> {
        self.get(section, key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn get_bool(&self, section: &str, key: &str) -> bool {
        self.get(section, key)
            .and_then(|v| parse_bool(&v))
            .or_else(|| default_for(section, key).and_then(parse_bool))
            .unwrap_or(false)
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Option<u64> {
        self.get(section, key)
            .and_then(|v| v.trim().parse().ok())
            .or_else(|| default_for(section, key).and_then(|v| v.parse().ok()))
    }

    pub fn set(&self, section: &str, key: &str, value: impl Into<String>) {
        self.ini
            .write()
            .set_to(Some(section), key.to_string(), value.into());
    }

    /// Apply `(section, key, value)` changes and persist them. A failed write
    /// rolls the store back so memory and file stay in step.
    pub fn update(&self, changes: &[(&str, &str, String)]) -> Result<()> {
        let previous = {
            let mut ini = self.ini.write();
            let previous = ini.clone();
            for (section, key, value) in changes {
                ini.set_to(Some(*section), key.to_string(), value.clone());
            }
            previous
        };
        if let Err(e) = self.save() {
            *self.ini.write() = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Persist to disk. Concurrent saves are serialised; last write wins.
    pub fn save(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let _guard = self.save_lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let ini = self.ini.read();
        ini.write_to_file(&self.path)?;
        info!("Saved config to {}", self.path.display());
        Ok(())
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.get_bool("EnabledAI", provider.name())
    }

    /// Cookie value configured for `provider`, blank treated as absent.
    pub fn cookie(&self, provider: Provider, cookie: &str) -> Option<String> {
        provider
            .config_cookie_key(cookie)
            .and_then(|key| self.get_non_empty("Cookies", key))
    }

    /// Typed snapshot, with `HOST`/`PORT` environment overrides applied.
    pub fn settings(&self) -> Settings {
        let host = std::env::var("HOST")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| self.get_non_empty("Server", "host"))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .or_else(|| self.get_u64("Server", "port").and_then(|p| u16::try_from(p).ok()))
            .unwrap_or(DEFAULT_PORT);

        let default_models = Provider::all()
            .iter()
            .map(|p| {
                let model = self
                    .get_non_empty("AI", p.default_model_key())
                    .unwrap_or_else(|| p.default_model().to_string());
                (*p, model)
            })
            .collect();
        let enabled = Provider::all()
            .iter()
            .map(|p| (*p, self.is_enabled(*p)))
            .collect();

        Settings {
            browser: self
                .get_non_empty("Browser", "name")
                .unwrap_or_else(|| "firefox".into())
                .to_lowercase(),
            default_ai: self
                .get_non_empty("AI", "default_ai")
                .unwrap_or_else(|| "gemini".into())
                .to_lowercase(),
            default_models,
            enabled,
            http_proxy: self.get_non_empty("Proxy", "http_proxy"),
            server: ServerSettings {
                host,
                port,
                request_timeout: Duration::from_secs(
                    self.get_u64("Server", "request_timeout_secs").unwrap_or(60).max(1),
                ),
                max_sessions: self.get_u64("Server", "max_sessions").unwrap_or(256).max(1) as usize,
                session_ttl: Duration::from_secs(
                    self.get_u64("Server", "session_ttl_secs").unwrap_or(3600),
                ),
                fallback_command: self
                    .get_non_empty("Server", "fallback_command")
                    .unwrap_or_else(|| DEFAULT_FALLBACK_COMMAND.into()),
            },
        }
    }

    /// All sections as nested maps with cookie values masked, for display.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let ini = self.ini.read();
        let mut out: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (section, props) in ini.iter() {
            let Some(section) = section else { continue };
            let entries = out.entry(section.to_string()).or_default();
            for (key, value) in props.iter() {
                let shown = if section.eq_ignore_ascii_case("Cookies") {
                    mask_secret(value)
                } else {
                    value.to_string()
                };
                entries.insert(key.to_string(), shown);
            }
        }
        out
    }
}

/// Show only a short prefix of a secret value.
pub fn mask_secret(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        String::new()
    } else {
        let prefix: String = value.chars().take(6).collect();
        format!("{}…", prefix)
    }
}

fn lookup(ini: &Ini, section: &str, key: &str) -> Option<String> {
    if let Some(v) = ini.get_from(Some(section), key) {
        return Some(v.to_string());
    }
    // configparser-style files are often written with different casing
    ini.iter()
        .filter(|(s, _)| s.is_some_and(|s| s.eq_ignore_ascii_case(section)))
        .flat_map(|(_, props)| props.iter())
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.to_string())
}

/// Insert defaults for missing keys. Returns how many were added.
fn fill_defaults(ini: &mut Ini) -> usize {
    let mut filled = 0;
    for (section, key, value) in DEFAULTS {
        if lookup(ini, section, key).is_none() {
            ini.set_to(Some(*section), key.to_string(), value.to_string());
            filled += 1;
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.conf");
        let store = ConfigStore::load(&path).unwrap();

        assert!(path.exists());
        assert_eq!(store.get("Browser", "name").as_deref(), Some("firefox"));
        assert!(store.is_enabled(Provider::Gemini));
        assert!(!store.is_enabled(Provider::Claude));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[Cookies]"));
        assert!(written.contains("default_model_gemini"));
    }

    #[test]
    fn test_missing_keys_are_filled_and_unknown_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.conf");
        std::fs::write(&path, "[Browser]\nname = chrome\n\n[Extra]\nfoo = bar\n").unwrap();

        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.get("Browser", "name").as_deref(), Some("chrome"));
        assert_eq!(store.get("AI", "default_ai").as_deref(), Some("gemini"));
        assert_eq!(store.get("Extra", "foo").as_deref(), Some("bar"));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("foo=bar") || written.contains("foo = bar"));
        assert!(written.contains("default_ai"));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let store = ConfigStore::from_ini_str("[cookies]\nGEMINI_COOKIE_1PSID = abc\n").unwrap();
        assert_eq!(
            store.cookie(Provider::Gemini, "__Secure-1PSID").as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_blank_cookie_is_absent() {
        let store = ConfigStore::from_ini_str("[Cookies]\nclaude_cookie =   \n").unwrap();
        assert!(store.cookie(Provider::Claude, "sessionKey").is_none());
    }

    #[test]
    fn test_bool_parsing_falls_back_to_default() {
        let store =
            ConfigStore::from_ini_str("[EnabledAI]\ngemini = maybe\nclaude = yes\n").unwrap();
        assert!(store.is_enabled(Provider::Gemini));
        assert!(store.is_enabled(Provider::Claude));
    }

    #[test]
    fn test_set_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.conf");
        let store = ConfigStore::load(&path).unwrap();
        store.set("AI", "default_ai", "claude");
        store.save().unwrap();

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.get("AI", "default_ai").as_deref(), Some("claude"));
        assert_eq!(
            reloaded.settings().default_provider().unwrap(),
            Provider::Claude
        );
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.conf");
        let store = ConfigStore::load(&path).unwrap();

        store
            .update(&[("AI", "default_ai", "claude".to_string())])
            .unwrap();
        assert_eq!(store.get("AI", "default_ai").as_deref(), Some("claude"));

        // Replace the file with a directory so the next write fails.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        let err = store
            .update(&[
                ("AI", "default_ai", "gemini".to_string()),
                ("EnabledAI", "claude", "true".to_string()),
            ])
            .unwrap_err();
        assert!(!err.to_string().is_empty());
        assert_eq!(store.get("AI", "default_ai").as_deref(), Some("claude"));
        assert!(!store.is_enabled(Provider::Claude));
    }

    #[test]
    fn test_settings_snapshot() {
        let store = ConfigStore::from_ini_str(
            "[Server]\nrequest_timeout_secs = 5\nmax_sessions = 3\n[Proxy]\nhttp_proxy = http://127.0.0.1:8080\n",
        )
        .unwrap();
        let settings = store.settings();
        assert_eq!(settings.server.request_timeout, Duration::from_secs(5));
        assert_eq!(settings.server.max_sessions, 3);
        assert_eq!(settings.http_proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(settings.default_model(Provider::Gemini), DEFAULT_GEMINI_MODEL);
    }

    #[test]
    fn test_unsupported_default_ai() {
        let store = ConfigStore::from_ini_str("[AI]\ndefault_ai = chatgpt\n").unwrap();
        let err = store.settings().default_provider().unwrap_err();
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn test_snapshot_hides_cookies() {
        let store =
            ConfigStore::from_ini_str("[Cookies]\nclaude_cookie = sk-ant-verysecretvalue\n")
                .unwrap();
        let view = store.snapshot();
        let shown = &view["Cookies"]["claude_cookie"];
        assert!(shown.starts_with("sk-ant"));
        assert!(!shown.contains("verysecret"));
    }
}
