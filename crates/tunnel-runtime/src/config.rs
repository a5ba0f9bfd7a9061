//! Configuration loading.
//!
//! Order: defaults, then the TOML file named by `TUNNEL_CONFIG`, then
//! environment overrides.
//!
//! | Variable            | Effect                                          |
//! |---------------------|-------------------------------------------------|
//! | `TUNNEL_CONFIG`     | Path of a TOML config file                      |
//! | `TUNNEL_ADMIN_PORT` | `admin.port`                                    |
//! | `TUNNEL_RATE_LIMIT` | `rate_limit.limit`, or `off` to disable         |
//! | `TUNNEL_ALLOW`      | `access.allow`, comma separated                 |
//! | `TUNNEL_BLOCK`      | `access.block`, comma separated                 |

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tunnel_gateway::TunnelConfig;

pub fn load_config() -> Result<TunnelConfig> {
    let path = std::env::var_os("TUNNEL_CONFIG").map(PathBuf::from);
    load_config_from(path.as_deref(), |key| std::env::var(key).ok())
}

/// Load from an optional file and an environment lookup
pub fn load_config_from(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<TunnelConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: TunnelConfig = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            info!(path = %path.display(), "Loaded configuration file");
            config
        }
        None => TunnelConfig::default(),
    };

    apply_env_overrides(&mut config, env);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn apply_env_overrides(config: &mut TunnelConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(port) = env("TUNNEL_ADMIN_PORT") {
        match port.trim().parse() {
            Ok(p) => config.admin.port = p,
            Err(_) => warn!(value = %port, "Ignoring invalid TUNNEL_ADMIN_PORT"),
        }
    }

    if let Some(limit) = env("TUNNEL_RATE_LIMIT") {
        let limit = limit.trim();
        if limit.eq_ignore_ascii_case("off") {
            config.rate_limit.enabled = false;
        } else {
            match limit.parse() {
                Ok(n) => {
                    config.rate_limit.enabled = true;
                    config.rate_limit.limit = n;
                }
                Err(_) => warn!(value = %limit, "Ignoring invalid TUNNEL_RATE_LIMIT"),
            }
        }
    }

    if let Some(allow) = env("TUNNEL_ALLOW") {
        config.access.allow = split_list(&allow);
    }
    if let Some(block) = env("TUNNEL_BLOCK") {
        config.access.block = split_list(&block);
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
