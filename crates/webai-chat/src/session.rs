//! Session router: conversation key → live provider session.
//!
//! The table is a bounded LRU with an idle TTL. Table mutation happens under a
//! short synchronous lock that is never held across an `.await`; each session
//! sits behind its own async mutex so create-if-absent and send are critical
//! sections per key while unrelated keys proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webai_core::{ConfigStore, Error, Provider, Result};

use crate::adapter::{split_messages, Conversation};
use crate::credentials::CredentialResolver;
use crate::providers::{GenerateRequest, ProviderConnector, ProviderSession};
use crate::types::{ChatMessage, Role, SessionSummary};

/// Live conversation state for one key.
pub struct Session {
    pub provider: Provider,
    pub model: String,
    /// Turns this session has exchanged with the provider, in order.
    pub history: Vec<ChatMessage>,
    pub continuation: Option<String>,
    /// System preamble last sent to the provider.
    pub system: Option<String>,
    client: Arc<dyn ProviderSession>,
}

/// Bookkeeping readable without taking the session lock.
#[derive(Clone)]
struct SlotMeta {
    provider: Option<Provider>,
    model: String,
    turns: usize,
    has_continuation: bool,
    created_at: DateTime<Utc>,
    last_used: Instant,
}

struct SessionSlot {
    session: tokio::sync::Mutex<Option<Session>>,
    meta: Mutex<SlotMeta>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            session: tokio::sync::Mutex::new(None),
            meta: Mutex::new(SlotMeta {
                provider: None,
                model: String::new(),
                turns: 0,
                has_continuation: false,
                created_at: Utc::now(),
                last_used: Instant::now(),
            }),
        }
    }

    fn touch(&self) {
        self.meta.lock().last_used = Instant::now();
    }

    fn record(&self, session: &Session) {
        let mut meta = self.meta.lock();
        meta.provider = Some(session.provider);
        meta.model = session.model.clone();
        meta.turns = session.history.len();
        meta.has_continuation = session.continuation.is_some();
        meta.last_used = Instant::now();
    }
}

/// Reference to one session in the router.
#[derive(Clone)]
pub struct SessionHandle {
    key: String,
    slot: Arc<SessionSlot>,
    provider: Provider,
    model: String,
}

impl SessionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether both handles point at the same underlying session.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Copy of the session's exchanged turns.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.slot
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    pub async fn continuation(&self) -> Option<String> {
        self.slot
            .session
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.continuation.clone())
    }
}

struct Table {
    slots: HashMap<String, Arc<SessionSlot>>,
    order: Vec<String>,
}

impl Table {
    fn promote(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(pos);
            self.order.push(key);
        }
    }

    fn remove(&mut self, key: &str) -> Option<Arc<SessionSlot>> {
        self.order.retain(|k| k != key);
        self.slots.remove(key)
    }
}

/// Limits for the session table and provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RouterLimits {
    pub max_sessions: usize,
    pub session_ttl: Duration,
    pub request_timeout: Duration,
}

impl RouterLimits {
    pub fn from_settings(settings: &webai_core::Settings) -> Self {
        Self {
            max_sessions: settings.server.max_sessions,
            session_ttl: settings.server.session_ttl,
            request_timeout: settings.server.request_timeout,
        }
    }
}

impl Default for RouterLimits {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            session_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub struct SessionRouter {
    table: Mutex<Table>,
    config: Arc<ConfigStore>,
    resolver: CredentialResolver,
    connector: Arc<dyn ProviderConnector>,
    limits: RouterLimits,
}

impl SessionRouter {
    pub fn new(
        config: Arc<ConfigStore>,
        resolver: CredentialResolver,
        connector: Arc<dyn ProviderConnector>,
        limits: RouterLimits,
    ) -> Self {
        Self {
            table: Mutex::new(Table {
                slots: HashMap::new(),
                order: Vec::new(),
            }),
            config,
            resolver,
            connector,
            limits,
        }
    }

    pub fn limits(&self) -> RouterLimits {
        self.limits
    }

    /// Slot for `key`, inserting an empty one (and evicting the least recently
    /// used beyond capacity) when absent.
    fn slot(&self, key: &str) -> Arc<SessionSlot> {
        let mut table = self.table.lock();

        let expired = table
            .slots
            .get(key)
            .map(|s| s.meta.lock().last_used.elapsed() >= self.limits.session_ttl);
        if expired == Some(true) {
            debug!("Session '{}' expired", key);
            table.remove(key);
        }

        if let Some(slot) = table.slots.get(key).cloned() {
            table.promote(key);
            slot.touch();
            return slot;
        }

        while table.slots.len() >= self.limits.max_sessions.max(1) && !table.order.is_empty() {
            let oldest = table.order.remove(0);
            table.slots.remove(&oldest);
            info!("Evicted least recently used session '{}'", oldest);
        }

        let slot = Arc::new(SessionSlot::new());
        table.slots.insert(key.to_string(), slot.clone());
        table.order.push(key.to_string());
        slot
    }

    /// Drop `slot` from the table if it is still the one stored under `key`
    /// and never got a session.
    fn discard_if_empty(&self, key: &str, slot: &Arc<SessionSlot>) {
        let mut table = self.table.lock();
        let same = table
            .slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if same && slot.meta.lock().provider.is_none() {
            table.remove(key);
        }
    }

    fn check_enabled(&self, provider: Provider) -> Result<()> {
        if !self.config.is_enabled(provider) {
            return Err(Error::ProviderUnavailable(format!(
                "{} is disabled in the [EnabledAI] section",
                provider
            )));
        }
        Ok(())
    }

    /// Make `session` a live `provider` session using `model`, opening a new
    /// one when absent or bound to another provider. Leaves `session` as it
    /// was when opening fails.
    async fn ensure(
        &self,
        key: &str,
        slot: &SessionSlot,
        session: &mut Option<Session>,
        provider: Provider,
        model: &str,
    ) -> Result<()> {
        let reusable = session.as_ref().is_some_and(|s| s.provider == provider);
        if !reusable {
            if session.is_some() {
                info!("Session '{}' switched provider to {}, starting over", key, provider);
            }
            let credentials = self.resolver.resolve(provider)?;
            let client = self.connector.open(&credentials).await?;
            *session = Some(Session {
                provider,
                model: model.to_string(),
                history: Vec::new(),
                continuation: None,
                system: None,
                client,
            });
            slot.meta.lock().created_at = Utc::now();
            info!("Created {} session '{}'", provider, key);
        }

        if let Some(session) = session.as_mut() {
            session.model = model.to_string();
            slot.record(session);
        }
        Ok(())
    }

    /// Existing session for `key`, or a new one. Absence always triggers
    /// creation; a provider change for an existing key starts a fresh session.
    ///
    /// The handle remembers `provider` and `model`: a later [`send`] through
    /// it always reaches that provider with that model, even if another
    /// caller re-targeted the key in between.
    ///
    /// [`send`]: SessionRouter::send
    pub async fn get_or_create(
        &self,
        key: &str,
        provider: Provider,
        model: &str,
    ) -> Result<SessionHandle> {
        self.check_enabled(provider)?;

        let slot = self.slot(key);
        let mut guard = slot.session.lock().await;
        if let Err(e) = self.ensure(key, &slot, &mut guard, provider, model).await {
            drop(guard);
            self.discard_if_empty(key, &slot);
            return Err(e);
        }
        drop(guard);

        Ok(SessionHandle {
            key: key.to_string(),
            slot,
            provider,
            model: model.to_string(),
        })
    }

    /// Send the latest user message (with any new system preamble) and return
    /// the reply. History and continuation token change only on success.
    pub async fn send(&self, handle: &SessionHandle, messages: &[ChatMessage]) -> Result<String> {
        let conversation = split_messages(messages)?;

        let mut guard = handle.slot.session.lock().await;
        if guard.is_none() {
            return Err(Error::Internal(format!("session '{}' was closed", handle.key)));
        }
        self.ensure(&handle.key, &handle.slot, &mut guard, handle.provider, &handle.model)
            .await?;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Internal(format!("session '{}' was closed", handle.key)))?;
        self.exchange_locked(&handle.key, &handle.slot, session, conversation)
            .await
    }

    /// Create-if-absent and send as one critical section on `key`.
    pub async fn exchange(
        &self,
        key: &str,
        provider: Provider,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String> {
        let conversation = split_messages(messages)?;
        self.check_enabled(provider)?;

        let slot = self.slot(key);
        let mut guard = slot.session.lock().await;
        if let Err(e) = self.ensure(key, &slot, &mut guard, provider, model).await {
            drop(guard);
            self.discard_if_empty(key, &slot);
            return Err(e);
        }
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Internal(format!("session '{}' was closed", key)))?;
        self.exchange_locked(key, &slot, session, conversation).await
    }

    /// One provider call on a session whose lock the caller holds.
    async fn exchange_locked(
        &self,
        key: &str,
        slot: &SessionSlot,
        session: &mut Session,
        conversation: Conversation,
    ) -> Result<String> {
        let request = GenerateRequest {
            model: session.model.clone(),
            prompt: build_prompt(session, &conversation),
            continuation: session.continuation.clone(),
        };
        debug!(
            "Sending {} chars to {} for '{}'",
            request.prompt.len(),
            session.provider,
            key
        );

        let generation = tokio::time::timeout(
            self.limits.request_timeout,
            session.client.generate(request),
        )
        .await
        .map_err(|_| {
            Error::Transport(format!(
                "{} did not answer within {}s",
                session.provider,
                self.limits.request_timeout.as_secs()
            ))
        })?
        .map_err(|e| {
            warn!("{} exchange for '{}' failed: {}", session.provider, key, e);
            e
        })?;

        if session.history.is_empty() && session.continuation.is_none() {
            session.history.extend(conversation.history.iter().cloned());
        }
        session
            .history
            .push(ChatMessage::user(conversation.latest_user.clone()));
        session
            .history
            .push(ChatMessage::assistant(generation.text.clone()));
        if generation.continuation.is_some() {
            session.continuation = generation.continuation;
        }
        session.system = conversation.system;
        slot.record(session);

        Ok(generation.text)
    }

    /// Remove a session. Returns whether one existed.
    pub fn close_session(&self, key: &str) -> bool {
        let removed = self.table.lock().remove(key).is_some();
        if removed {
            debug!("Closed session '{}'", key);
        }
        removed
    }

    /// Summaries of live sessions, most recently used last.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let table = self.table.lock();
        table
            .order
            .iter()
            .filter_map(|key| {
                let meta = table.slots.get(key)?.meta.lock().clone();
                let provider = meta.provider?;
                Some(SessionSummary {
                    key: key.clone(),
                    provider: provider.name().to_string(),
                    model: meta.model,
                    turns: meta.turns,
                    has_continuation: meta.has_continuation,
                    created_at: meta.created_at.to_rfc3339(),
                    idle_secs: meta.last_used.elapsed().as_secs(),
                })
            })
            .collect()
    }

    /// Drop sessions idle longer than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut table = self.table.lock();
        let ttl = self.limits.session_ttl;
        let expired: Vec<String> = table
            .slots
            .iter()
            .filter(|(_, slot)| slot.meta.lock().last_used.elapsed() >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            table.remove(key);
        }
        if !expired.is_empty() {
            info!("Purged {} idle sessions", expired.len());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.table.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::System => "System",
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::Tool => "Tool",
    }
}

fn transcript(turns: &[ChatMessage]) -> String {
    turns
        .iter()
        .map(|m| format!("{}: {}", speaker(m.role), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt text for the next exchange on `session`.
///
/// The providers have no system role, so system text is prepended. On the
/// first exchange prior request turns are inlined as a transcript; afterwards
/// only a changed system preamble and the latest message are sent, plus the
/// session transcript when the provider gave no continuation token.
pub fn build_prompt(session: &Session, conversation: &Conversation) -> String {
    let first = session.history.is_empty() && session.continuation.is_none();
    let mut sections: Vec<String> = Vec::new();

    if first {
        if let Some(system) = &conversation.system {
            sections.push(system.clone());
        }
        if !conversation.history.is_empty() {
            sections.push(transcript(&conversation.history));
        }
    } else {
        if let Some(system) = &conversation.system {
            if session.system.as_deref() != Some(system.as_str()) {
                sections.push(system.clone());
            }
        }
        if session.continuation.is_none() {
            sections.push(transcript(&session.history));
        }
    }

    if sections.is_empty() {
        return conversation.latest_user.clone();
    }
    if session.continuation.is_none() && !(first && conversation.history.is_empty()) {
        sections.push(format!("User: {}", conversation.latest_user));
    } else {
        sections.push(conversation.latest_user.clone());
    }
    sections.join("\n\n")
}
