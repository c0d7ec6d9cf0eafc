// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Collects every violation instead of failing on the first one.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::{DatabaseSourceConfig, MeridianConfig, UpdateMode};

pub fn validate_config(config: &MeridianConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.server.server_id.trim().is_empty() {
        errors.push(ConfigError::validation("server.server_id must not be empty"));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    let cluster = &config.cluster;
    if cluster.lease_ttl_secs == 0 {
        errors.push(ConfigError::validation(
            "cluster.lease_ttl_secs must be at least 1",
        ));
    }
    if cluster.heartbeat_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "cluster.heartbeat_interval_secs must be at least 1",
        ));
    }
    if cluster.heartbeat_interval_secs >= cluster.lease_ttl_secs {
        errors.push(ConfigError::validation(format!(
            "cluster.heartbeat_interval_secs ({}) must be less than cluster.lease_ttl_secs ({})",
            cluster.heartbeat_interval_secs, cluster.lease_ttl_secs
        )));
    }

    if config.gateway.enabled && config.gateway.host.trim().is_empty() {
        errors.push(ConfigError::validation("gateway.host must not be empty"));
    }

    if config.script.fuel == 0 {
        errors.push(ConfigError::validation("script.fuel must be at least 1"));
    }
    if config.script.timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "script.timeout_secs must be at least 1",
        ));
    }

    let mut seen_ids = HashSet::new();
    let mut seen_names = HashSet::new();
    for (i, channel) in config.channels.iter().enumerate() {
        if channel.id.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "channels[{i}].id must not be empty"
            )));
        } else if !seen_ids.insert(channel.id.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate channel id `{}` in [[channels]] array",
                channel.id
            )));
        }

        if channel.name.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "channels[{i}].name must not be empty"
            )));
        } else if !seen_names.insert(channel.name.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate channel name `{}` in [[channels]] array",
                channel.name
            )));
        }

        validate_source(&format!("channels[{i}].source"), &channel.source, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_source(prefix: &str, source: &DatabaseSourceConfig, errors: &mut Vec<ConfigError>) {
    if source.url.trim().is_empty() {
        errors.push(ConfigError::validation(format!(
            "{prefix}.url must not be empty"
        )));
    }
    if source.select.trim().is_empty() {
        errors.push(ConfigError::validation(format!(
            "{prefix}.select must not be empty"
        )));
    }
    let has_update = source
        .update
        .as_deref()
        .is_some_and(|u| !u.trim().is_empty());
    if source.update_mode != UpdateMode::Never && !has_update {
        errors.push(ConfigError::validation(format!(
            "{prefix}.update is required when update_mode is not `never`"
        )));
    }
    if source.poll_interval_ms == 0 {
        errors.push(ConfigError::validation(format!(
            "{prefix}.poll_interval_ms must be at least 1"
        )));
    }
    if source.pool_size == 0 {
        errors.push(ConfigError::validation(format!(
            "{prefix}.pool_size must be at least 1"
        )));
    }
}
