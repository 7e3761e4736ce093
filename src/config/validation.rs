use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be at least 1")]
    ZeroLimit { field: &'static str },

    #[error("retry_backoff_ms ({initial}) exceeds max_backoff_ms ({max})")]
    BackoffOrder { initial: u64, max: u64 },

    #[error("max_page_size must be positive")]
    ZeroPageSize,

    #[error("download directory must not be empty")]
    EmptyDirectory,

    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidLogFilter { filter: String, reason: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_limits(config)?;
    validate_backoff(config)?;
    validate_http(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_limits(config: &Config) -> Result<(), ValidationError> {
    let d = &config.download;
    let limits = [
        ("max_concurrent_chapters", d.max_concurrent_chapters as u64),
        ("max_concurrent_images", d.max_concurrent_images as u64),
        ("max_retries", d.max_retries as u64),
        ("request_timeout_secs", d.request_timeout_secs),
    ];

    for (field, value) in limits {
        if value == 0 {
            return Err(ValidationError::ZeroLimit { field });
        }
    }

    if d.directory.as_os_str().is_empty() {
        return Err(ValidationError::EmptyDirectory);
    }

    Ok(())
}

fn validate_backoff(config: &Config) -> Result<(), ValidationError> {
    let d = &config.download;
    if d.retry_backoff_ms > d.max_backoff_ms {
        return Err(ValidationError::BackoffOrder {
            initial: d.retry_backoff_ms,
            max: d.max_backoff_ms,
        });
    }
    Ok(())
}

fn validate_http(config: &Config) -> Result<(), ValidationError> {
    if config.http.max_page_size.as_u64() == 0 {
        return Err(ValidationError::ZeroPageSize);
    }
    if config.http.connect_timeout_secs == 0 {
        return Err(ValidationError::ZeroLimit {
            field: "connect_timeout_secs",
        });
    }
    Ok(())
}

fn validate_logging(config: &Config) -> Result<(), ValidationError> {
    tracing_subscriber::EnvFilter::try_new(&config.logging.filter)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidLogFilter {
            filter: config.logging.filter.clone(),
            reason: e.to_string(),
        })
}
