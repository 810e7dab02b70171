use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use uuid::Uuid;

use crate::constants::{CHANNEL_LENGTH, CLIENT_ID_PREFIX};

/// Generate a random channel identifier
/// Format: 12 lowercase alphanumeric characters
pub fn generate_channel() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CHANNEL_LENGTH)
        .map(|c| c.to_ascii_lowercase())
        .map(char::from)
        .collect()
}

/// Generate a fresh broker client identifier for this process
pub fn generate_client_id() -> String {
    format!("{}-{}", CLIENT_ID_PREFIX, Uuid::new_v4())
}
