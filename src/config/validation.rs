//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (upload/download names exist among rule sets)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::throttle::scheduler::{MAX_BURST_INTERVAL_MS, MIN_BURST_INTERVAL_MS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("throttle.burst_interval_ms must be within {MIN_BURST_INTERVAL_MS}..={MAX_BURST_INTERVAL_MS}, got {0}")]
    BurstInterval(u64),

    #[error("duplicate rule set name {0:?}")]
    DuplicateRuleSet(String),

    #[error("{field} names unknown rule set {name:?}")]
    UnknownRuleSet { field: &'static str, name: String },

    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("listener.tls has no certificates")]
    NoCertificates,

    #[error("listener.tls declares more than one default certificate")]
    MultipleDefaultCertificates,

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingApiKey,
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_connections" });
    }
    if let Some(tls) = &config.listener.tls {
        if tls.certificates.is_empty() {
            errors.push(ValidationError::NoCertificates);
        }
        if tls.certificates.iter().filter(|c| c.server_name.is_none()).count() > 1 {
            errors.push(ValidationError::MultipleDefaultCertificates);
        }
    }

    if config.upstream.address.is_empty() {
        errors.push(ValidationError::InvalidAddress {
            field: "upstream.address",
            value: String::new(),
        });
    }
    let retries = &config.upstream.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::Zero { field: "upstream.retries.max_attempts" });
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base: retries.base_delay_ms,
            max: retries.max_delay_ms,
        });
    }

    let throttle = &config.throttle;
    if !(MIN_BURST_INTERVAL_MS..=MAX_BURST_INTERVAL_MS).contains(&throttle.burst_interval_ms) {
        errors.push(ValidationError::BurstInterval(throttle.burst_interval_ms));
    }
    let mut seen = HashSet::new();
    for rule_set in &throttle.rule_sets {
        if !seen.insert(rule_set.name.as_str()) {
            errors.push(ValidationError::DuplicateRuleSet(rule_set.name.clone()));
        }
    }
    for (field, name) in [
        ("throttle.upload_rule_set", &throttle.upload_rule_set),
        ("throttle.download_rule_set", &throttle.download_rule_set),
    ] {
        if let Some(name) = name {
            if throttle.index_of(name).is_none() {
                errors.push(ValidationError::UnknownRuleSet { field, name: name.clone() });
            }
        }
    }

    if config.websocket.max_message_size == 0 {
        errors.push(ValidationError::Zero { field: "websocket.max_message_size" });
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_secs", timeouts.connect_secs),
        ("timeouts.head_secs", timeouts.head_secs),
        ("timeouts.idle_secs", timeouts.idle_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::MissingApiKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RuleSetConfig;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nope".into();
        config.throttle.burst_interval_ms = 0;
        config.throttle.rule_sets = vec![
            RuleSetConfig { name: "a".into(), bytes_per_second: 1 },
            RuleSetConfig { name: "a".into(), bytes_per_second: 2 },
        ];
        config.throttle.download_rule_set = Some("missing".into());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::BurstInterval(0)));
        assert!(errors.contains(&ValidationError::DuplicateRuleSet("a".into())));
        assert!(errors.contains(&ValidationError::UnknownRuleSet {
            field: "throttle.download_rule_set",
            name: "missing".into(),
        }));
    }
}
