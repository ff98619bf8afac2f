pub mod config;
pub mod error;
pub mod key;
pub mod token;
pub mod types;

pub use config::KeyturnConfig;
pub use error::{KeyturnError, Result};
pub use key::generate_key;
pub use token::{ActionToken, NewToken, TokenPolicy, TokenStatus};
pub use types::*;
