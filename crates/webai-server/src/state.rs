//! Shared application state.

use std::sync::Arc;

use parking_lot::RwLock;
use webai_browser::{BrowserCookieJar, CookieSource};
use webai_chat::{CredentialResolver, ProviderConnector, RouterLimits, SessionRouter, WebConnector};
use webai_core::{ConfigStore, Settings};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub resolver: CredentialResolver,
    pub router: Arc<SessionRouter>,
    settings: RwLock<Settings>,
}

impl AppState {
    /// Production wiring: browser cookie jar and the web provider clients.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let proxy = config.settings().http_proxy;
        Self::with_parts(
            config,
            Arc::new(BrowserCookieJar::new()),
            Arc::new(WebConnector::new(proxy)),
        )
    }

    pub fn with_parts(
        config: Arc<ConfigStore>,
        cookies: Arc<dyn CookieSource>,
        connector: Arc<dyn ProviderConnector>,
    ) -> Self {
        let settings = config.settings();
        let resolver = CredentialResolver::new(config.clone(), cookies);
        let router = SessionRouter::new(
            config.clone(),
            resolver.clone(),
            connector,
            RouterLimits::from_settings(&settings),
        );
        Self {
            config,
            resolver,
            router: Arc::new(router),
            settings: RwLock::new(settings),
        }
    }

    /// Current typed settings.
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Re-read settings from the config store after an update.
    pub fn reload_settings(&self) {
        *self.settings.write() = self.config.settings();
    }
}
