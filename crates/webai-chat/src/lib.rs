//! Chat over browser-authenticated web providers.
//!
//! Provider clients for the Gemini and Claude web UIs, credential resolution,
//! the per-conversation session router, and the adapters that speak the
//! OpenAI chat-completion and Anthropic Messages shapes.

pub mod adapter;
pub mod credentials;
pub mod messages;
pub mod providers;
pub mod session;
pub mod types;

pub use adapter::{ConversationKey, ModelRoute};
pub use credentials::{CredentialResolver, CredentialSource, Credentials};
pub use messages::MessagesRequest;
pub use providers::{GenerateRequest, Generation, ProviderConnector, ProviderSession, WebConnector};
pub use session::{RouterLimits, SessionHandle, SessionRouter};
pub use types::*;
