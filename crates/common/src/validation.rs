//! Input validation for identifiers that end up in topic names and URLs

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::constants::MAX_CHANNEL_LENGTH;

/// Regex for validating channel identifiers (safe as a single topic level and URL segment)
static CHANNEL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Regex for validating function names (AWS Lambda naming rules)
static FUNCTION_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid channel format: {0}")]
    InvalidChannel(String),

    #[error("Channel too long: {0} bytes (max: {1})")]
    ChannelTooLong(usize, usize),

    #[error("Invalid function name: {0}")]
    InvalidFunctionName(String),

    #[error("Invalid function reference: {0}")]
    InvalidFunctionRef(String),
}

/// Validate channel identifier format
///
/// # Examples
///
/// ```
/// use dev_tunnel_common::validation::validate_channel;
///
/// assert!(validate_channel("abc123def456").is_ok());
/// assert!(validate_channel("my-app_dev").is_ok());
/// assert!(validate_channel("a/b").is_err());
/// assert!(validate_channel("").is_err());
/// ```
pub fn validate_channel(channel: &str) -> Result<(), ValidationError> {
    if channel.len() > MAX_CHANNEL_LENGTH {
        return Err(ValidationError::ChannelTooLong(
            channel.len(),
            MAX_CHANNEL_LENGTH,
        ));
    }
    if !CHANNEL_REGEX.is_match(channel) {
        return Err(ValidationError::InvalidChannel(
            channel.chars().take(50).collect::<String>(), // Limit error message
        ));
    }
    Ok(())
}

/// Validate a Lambda function name
pub fn validate_function_name(name: &str) -> Result<(), ValidationError> {
    if !FUNCTION_NAME_REGEX.is_match(name) {
        return Err(ValidationError::InvalidFunctionName(
            name.chars().take(70).collect::<String>(),
        ));
    }
    Ok(())
}
