//! keyturn API crate - axum HTTP server and route handlers.
//!
//! Serves token landing pages and consumption for end users, plus the
//! staff-only token administration endpoints.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
