//! Keyturn storage crate - SQLite persistence for tokens and users.
//!
//! Provides a WAL-mode SQLite database with migrations and the token
//! and user repositories.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{ConsumeOutcome, NewUser, TokenFilters, TokenRepository, UserRepository};
