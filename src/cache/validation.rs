//! Input validation for cache operations.

use std::time::Duration;

use crate::cache::error::CacheError;

/// Keys must be non-empty, at most `max_bytes`, and free of control characters.
pub fn validate_key(key: &str, max_bytes: usize) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key must not be empty".into()));
    }
    if key.len() > max_bytes {
        return Err(CacheError::InvalidKey(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            max_bytes
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(CacheError::InvalidKey(
            "key must not contain control characters".into(),
        ));
    }
    Ok(())
}

pub fn validate_value(value: &str, max_bytes: usize) -> Result<(), CacheError> {
    if value.len() > max_bytes {
        return Err(CacheError::InvalidValue(format!(
            "value is {} bytes, limit is {}",
            value.len(),
            max_bytes
        )));
    }
    Ok(())
}

/// TTL in seconds from a request. Negative or above `max` is rejected;
/// zero means no expiry.
pub fn parse_ttl_secs(ttl_secs: i64, max: Duration) -> Result<Option<Duration>, CacheError> {
    let secs = u64::try_from(ttl_secs)
        .map_err(|_| CacheError::InvalidTtl(format!("ttl must be >= 0, got {ttl_secs}")))?;
    if secs == 0 {
        return Ok(None);
    }
    let ttl = Duration::from_secs(secs);
    validate_ttl(ttl, max)?;
    Ok(Some(ttl))
}

pub fn validate_ttl(ttl: Duration, max: Duration) -> Result<(), CacheError> {
    if ttl > max {
        return Err(CacheError::InvalidTtl(format!(
            "ttl is {}s, limit is {}s",
            ttl.as_secs(),
            max.as_secs()
        )));
    }
    Ok(())
}
