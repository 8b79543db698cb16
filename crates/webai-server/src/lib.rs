//! HTTP transport front and process supervisor for WebAI.

pub mod error;
pub mod routes;
pub mod state;
pub mod supervisor;

pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
