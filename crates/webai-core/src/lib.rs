//! WebAI Core — error taxonomy, provider catalogue, configuration.

pub mod config;
pub mod error;
pub mod provider;

pub use config::{ConfigStore, ServerSettings, Settings};
pub use error::{Error, Result};
pub use provider::Provider;
