//! Cookie extraction from on-disk browser profiles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::types::{Browser, CookieError, Result};

/// Anything that can hand out the cookies a browser holds for a domain.
pub trait CookieSource: Send + Sync {
    /// Cookies (name -> value) whose host is `domain` or a subdomain of it.
    fn get_cookies(&self, browser: Browser, domain: &str) -> Result<HashMap<String, String>>;
}

/// Reads cookie databases from the user's browser profiles.
///
/// Databases are opened read-only with `immutable=1`, so a running browser
/// holding the file lock does not block extraction.
pub struct BrowserCookieJar {
    roots: HashMap<Browser, Vec<PathBuf>>,
}

impl BrowserCookieJar {
    /// Jar searching the platform's default profile locations.
    pub fn new() -> Self {
        let roots = Browser::all()
            .iter()
            .map(|b| (*b, default_roots(*b)))
            .collect();
        Self { roots }
    }

    /// Replace the search roots for one browser.
    ///
    /// For Firefox a root is a directory of profiles; for the Chromium family it
    /// is the user-data directory containing `Default/`.
    pub fn with_root(mut self, browser: Browser, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(browser, vec![root.into()]);
        self
    }

    /// Cookie database file for `browser`, if any exists.
    pub fn locate(&self, browser: Browser) -> Option<PathBuf> {
        let roots = self.roots.get(&browser)?;
        if browser.is_chromium_family() {
            roots.iter().find_map(|root| chromium_db(root))
        } else {
            roots
                .iter()
                .filter_map(|root| firefox_db(root))
                .max_by_key(|p| modified(p))
        }
    }
}

impl Default for BrowserCookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieSource for BrowserCookieJar {
    fn get_cookies(&self, browser: Browser, domain: &str) -> Result<HashMap<String, String>> {
        let db = self
            .locate(browser)
            .ok_or(CookieError::BrowserNotFound(browser))?;
        debug!("Reading {} cookies from {}", browser, db.display());

        let conn = open_immutable(&db)?;
        let rows = if browser.is_chromium_family() {
            read_chromium(&conn, domain)?
        } else {
            read_firefox(&conn, domain)?
        };

        if rows.is_empty() {
            return Err(CookieError::CookieNotPresent {
                browser,
                domain: domain.to_string(),
            });
        }
        info!("Found {} {} cookies for {}", rows.len(), browser, domain);
        Ok(rows)
    }
}

/// `host` equals `domain` or is one of its subdomains (leading dot ignored).
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_start_matches('.').to_lowercase();
    let domain = domain.trim_start_matches('.').to_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn open_immutable(path: &Path) -> Result<Connection> {
    let raw = path.to_string_lossy().replace('\\', "/");
    let escaped = raw.replace('%', "%25").replace('?', "%3f").replace('#', "%23");
    let uri = if escaped.starts_with('/') {
        format!("file:{}?immutable=1", escaped)
    } else {
        format!("file:/{}?immutable=1", escaped)
    };
    Ok(Connection::open_with_flags(
        uri,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
    )?)
}

fn read_firefox(conn: &Connection, domain: &str) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(
        "SELECT name, value, host FROM moz_cookies WHERE host LIKE ?1 ORDER BY length(host)",
    )?;
    let rows = stmt.query_map([format!("%{}", domain)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut cookies = HashMap::new();
    for row in rows {
        let (name, value, host) = row?;
        if host_matches(&host, domain) && !value.is_empty() {
            cookies.entry(name).or_insert(value);
        }
    }
    Ok(cookies)
}

fn read_chromium(conn: &Connection, domain: &str) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(
        "SELECT name, value, host_key, length(encrypted_value) FROM cookies \
         WHERE host_key LIKE ?1 ORDER BY length(host_key)",
    )?;
    let rows = stmt.query_map([format!("%{}", domain)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<i64>>(3)?.unwrap_or(0),
        ))
    })?;

    let mut cookies = HashMap::new();
    let mut encrypted = 0usize;
    for row in rows {
        let (name, value, host, encrypted_len) = row?;
        if !host_matches(&host, domain) {
            continue;
        }
        if value.is_empty() {
            if encrypted_len > 0 {
                encrypted += 1;
            }
            continue;
        }
        cookies.entry(name).or_insert(value);
    }
    if encrypted > 0 {
        debug!("Skipped {} encrypted cookies for {}", encrypted, domain);
    }
    Ok(cookies)
}

fn firefox_db(root: &Path) -> Option<PathBuf> {
    let direct = root.join("cookies.sqlite");
    if direct.is_file() {
        return Some(direct);
    }
    std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join("cookies.sqlite"))
        .filter(|p| p.is_file())
        .max_by_key(|p| modified(p))
}

fn chromium_db(root: &Path) -> Option<PathBuf> {
    ["Default/Network/Cookies", "Default/Cookies"]
        .iter()
        .map(|rel| root.join(rel))
        .find(|p| p.is_file())
}

fn modified(path: &Path) -> std::time::SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::UNIX_EPOCH)
}

fn default_roots(browser: Browser) -> Vec<PathBuf> {
    let home = dirs::home_dir();
    let config = dirs::config_dir();
    let local = dirs::data_local_dir();

    let mut roots = Vec::new();
    match browser {
        Browser::Firefox => {
            if let Some(home) = &home {
                roots.push(home.join(".mozilla/firefox"));
                roots.push(home.join("snap/firefox/common/.mozilla/firefox"));
                roots.push(home.join("Library/Application Support/Firefox/Profiles"));
            }
            if let Some(config) = &config {
                roots.push(config.join("Mozilla/Firefox/Profiles"));
            }
        }
        Browser::Chrome => {
            push_chromium(&mut roots, &config, &local, &["google-chrome", "Google/Chrome"])
        }
        Browser::Chromium => {
            push_chromium(&mut roots, &config, &local, &["chromium", "Chromium"])
        }
        Browser::Brave => {
            push_chromium(&mut roots, &config, &local, &["BraveSoftware/Brave-Browser"])
        }
        Browser::Edge => push_chromium(
            &mut roots,
            &config,
            &local,
            &["microsoft-edge", "Microsoft Edge", "Microsoft/Edge"],
        ),
    }
    roots
}

fn push_chromium(
    roots: &mut Vec<PathBuf>,
    config: &Option<PathBuf>,
    local: &Option<PathBuf>,
    names: &[&str],
) {
    for name in names {
        if let Some(config) = config {
            roots.push(config.join(name));
        }
        if let Some(local) = local {
            roots.push(local.join(name).join("User Data"));
        }
    }
}

/// In-memory cookie source.
#[derive(Debug, Default, Clone)]
pub struct StaticCookieSource {
    cookies: Vec<(String, String, String)>,
}

impl StaticCookieSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, host: &str, name: &str, value: &str) -> Self {
        self.cookies
            .push((host.to_string(), name.to_string(), value.to_string()));
        self
    }
}

impl CookieSource for StaticCookieSource {
    fn get_cookies(&self, browser: Browser, domain: &str) -> Result<HashMap<String, String>> {
        let found: HashMap<String, String> = self
            .cookies
            .iter()
            .filter(|(host, _, _)| host_matches(host, domain))
            .map(|(_, name, value)| (name.clone(), value.clone()))
            .collect();
        if found.is_empty() {
            return Err(CookieError::CookieNotPresent {
                browser,
                domain: domain.to_string(),
            });
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firefox_fixture(dir: &Path, rows: &[(&str, &str, &str)]) -> PathBuf {
        let profile = dir.join("abcd1234.default-release");
        std::fs::create_dir_all(&profile).unwrap();
        let db = profile.join("cookies.sqlite");
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE moz_cookies (id INTEGER PRIMARY KEY, name TEXT, value TEXT, host TEXT);",
        )
        .unwrap();
        for (host, name, value) in rows {
            conn.execute(
                "INSERT INTO moz_cookies (name, value, host) VALUES (?1, ?2, ?3)",
                [name, value, host],
            )
            .unwrap();
        }
        db
    }

    fn chromium_fixture(dir: &Path, rows: &[(&str, &str, &str, &str)]) {
        let default = dir.join("Default");
        std::fs::create_dir_all(&default).unwrap();
        let conn = Connection::open(default.join("Cookies")).unwrap();
        conn.execute_batch(
            "CREATE TABLE cookies (host_key TEXT, name TEXT, value TEXT, encrypted_value BLOB);",
        )
        .unwrap();
        for (host, name, value, encrypted) in rows {
            conn.execute(
                "INSERT INTO cookies (host_key, name, value, encrypted_value) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![host, name, value, encrypted.as_bytes()],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_host_matching() {
        assert!(host_matches(".google.com", "google.com"));
        assert!(host_matches("gemini.google.com", "google.com"));
        assert!(host_matches("claude.ai", "claude.ai"));
        assert!(!host_matches("notgoogle.com", "google.com"));
        assert!(!host_matches("google.com.evil.net", "google.com"));
    }

    #[test]
    fn test_firefox_profile_cookies() {
        let dir = tempfile::tempdir().unwrap();
        firefox_fixture(
            dir.path(),
            &[
                (".google.com", "__Secure-1PSID", "psid-value"),
                (".google.com", "__Secure-1PSIDTS", "psidts-value"),
                (".youtube.com", "OTHER", "nope"),
                ("notgoogle.com", "__Secure-1PSID", "wrong"),
            ],
        );
        let jar = BrowserCookieJar::new().with_root(Browser::Firefox, dir.path());

        let cookies = jar.get_cookies(Browser::Firefox, "google.com").unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies["__Secure-1PSID"], "psid-value");
        assert_eq!(cookies["__Secure-1PSIDTS"], "psidts-value");
    }

    #[test]
    fn test_chromium_skips_encrypted_values() {
        let dir = tempfile::tempdir().unwrap();
        chromium_fixture(
            dir.path(),
            &[
                (".claude.ai", "sessionKey", "sk-ant-plain", ""),
                (".claude.ai", "lastActiveOrg", "", "v10-ciphertext"),
            ],
        );
        let jar = BrowserCookieJar::new().with_root(Browser::Chrome, dir.path());

        let cookies = jar.get_cookies(Browser::Chrome, "claude.ai").unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies["sessionKey"], "sk-ant-plain");
    }

    #[test]
    fn test_missing_database_is_browser_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let jar = BrowserCookieJar::new().with_root(Browser::Brave, dir.path());
        let err = jar.get_cookies(Browser::Brave, "claude.ai").unwrap_err();
        assert!(matches!(err, CookieError::BrowserNotFound(Browser::Brave)));
    }

    #[test]
    fn test_no_matching_rows_is_cookie_not_present() {
        let dir = tempfile::tempdir().unwrap();
        firefox_fixture(dir.path(), &[(".example.com", "a", "b")]);
        let jar = BrowserCookieJar::new().with_root(Browser::Firefox, dir.path());
        let err = jar.get_cookies(Browser::Firefox, "claude.ai").unwrap_err();
        assert!(matches!(err, CookieError::CookieNotPresent { .. }));
    }

    #[test]
    fn test_static_source() {
        let source = StaticCookieSource::new().with_cookie(".claude.ai", "sessionKey", "abc");
        let cookies = source.get_cookies(Browser::Firefox, "claude.ai").unwrap();
        assert_eq!(cookies["sessionKey"], "abc");
        assert!(source.get_cookies(Browser::Firefox, "google.com").is_err());
    }
}
