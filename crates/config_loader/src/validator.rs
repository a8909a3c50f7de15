//! Config validation
//!
//! Rules:
//! - workers >= 1
//! - snapshot.interval_ms > 0
//! - retry.min_retry_delay_ms > 0 and initial_backoff_ms <= max_backoff_ms
//! - retry.max_attempts, when set, >= 1
//! - domain suffixes are non-empty
//! - queue limits >= 1

use contracts::{ContractError, DeliveryConfig};

/// Validate a DeliveryConfig
///
/// Returns the first error encountered.
pub fn validate(config: &DeliveryConfig) -> Result<(), ContractError> {
    validate_workers(config)?;
    validate_snapshot(config)?;
    validate_retry(config)?;
    validate_rate_limits(config)?;
    validate_queue_limits(config)?;
    Ok(())
}

fn validate_workers(config: &DeliveryConfig) -> Result<(), ContractError> {
    if config.workers == 0 {
        return Err(ContractError::config_validation(
            "workers",
            "workers must be >= 1",
        ));
    }
    Ok(())
}

fn validate_snapshot(config: &DeliveryConfig) -> Result<(), ContractError> {
    if config.snapshot.interval_ms == 0 {
        return Err(ContractError::config_validation(
            "snapshot.interval_ms",
            "interval_ms must be > 0",
        ));
    }
    Ok(())
}

fn validate_retry(config: &DeliveryConfig) -> Result<(), ContractError> {
    let retry = &config.retry;

    if retry.min_retry_delay_ms == 0 {
        return Err(ContractError::config_validation(
            "retry.min_retry_delay_ms",
            "min_retry_delay_ms must be > 0",
        ));
    }

    if retry.initial_backoff_ms > retry.max_backoff_ms {
        return Err(ContractError::config_validation(
            "retry.initial_backoff_ms / retry.max_backoff_ms",
            format!(
                "initial_backoff_ms ({}) must be <= max_backoff_ms ({})",
                retry.initial_backoff_ms, retry.max_backoff_ms
            ),
        ));
    }

    if retry.max_attempts == Some(0) {
        return Err(ContractError::config_validation(
            "retry.max_attempts",
            "max_attempts must be >= 1 (omit or set null for unbounded)",
        ));
    }

    Ok(())
}

fn validate_rate_limits(config: &DeliveryConfig) -> Result<(), ContractError> {
    for suffix in config.rate_limits.domain_suffix_limits.keys() {
        if suffix.trim().is_empty() {
            return Err(ContractError::config_validation(
                "rate_limits.domain_suffix_limits",
                "domain suffix cannot be empty",
            ));
        }
    }
    Ok(())
}

fn validate_queue_limits(config: &DeliveryConfig) -> Result<(), ContractError> {
    for (destination, limit) in &config.queue_limits {
        if *limit == 0 {
            return Err(ContractError::config_validation(
                format!("queue_limits.{destination}"),
                "queue limit must be >= 1",
            ));
        }
    }
    Ok(())
}
