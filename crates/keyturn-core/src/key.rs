//! Opaque token key generation.

use rand::Rng;

/// Length in characters of every generated key.
pub const KEY_LENGTH: usize = 40;

/// Generate a random 40-character hex key.
pub fn generate_key() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; KEY_LENGTH / 2] = rng.random();
    hex::encode(bytes)
}
