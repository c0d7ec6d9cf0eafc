// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./meridian.toml` > `~/.config/meridian/meridian.toml` >
//! `/etc/meridian/meridian.toml` with environment variable overrides via `MERIDIAN_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::MeridianConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/meridian/meridian.toml` (system-wide)
/// 3. `~/.config/meridian/meridian.toml` (user XDG config)
/// 4. `./meridian.toml` (local directory)
/// 5. `MERIDIAN_*` environment variables
pub fn load_config() -> Result<MeridianConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<MeridianConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MeridianConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<MeridianConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MeridianConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for XDG config loading, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(MeridianConfig::default()))
        .merge(Toml::file("/etc/meridian/meridian.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("meridian/meridian.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("meridian.toml"))
        .merge(env_provider())
}

/// Top-level sections that accept environment overrides.
const SECTIONS: [&str; 6] = ["server", "storage", "cluster", "shadow", "gateway", "script"];

/// Environment provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `MERIDIAN_CLUSTER_LEASE_TTL_SECS` must map to
/// `cluster.lease_ttl_secs`, not `cluster.lease.ttl.secs`.
fn env_provider() -> Env {
    Env::prefixed("MERIDIAN_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: MERIDIAN_GATEWAY_BEARER_TOKEN -> "gateway_bearer_token"
        let key_str = key.as_str();
        let mapped = SECTIONS
            .iter()
            .find_map(|section| {
                key_str
                    .strip_prefix(section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or_else(|| key_str.to_string());
        mapped.into()
    })
}
