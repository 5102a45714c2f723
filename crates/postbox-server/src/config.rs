//! Server configuration loaded from environment variables.
//!
//! Every setting has a default, so the server starts with no configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use postbox_api::Policy;

#[derive(Debug, Clone)]
pub struct Config {
    /// Env: `POSTBOX_DB_PATH`, default `postbox.db`
    pub db_path: PathBuf,
    /// Env: `POSTBOX_HOST` / `POSTBOX_PORT`, default `0.0.0.0:8080`
    pub addr: SocketAddr,
    pub policy: Policy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = get("POSTBOX_DB_PATH").unwrap_or_else(|| "postbox.db".into());
        let host = get("POSTBOX_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("POSTBOX_PORT")
            .unwrap_or_else(|| "8080".into())
            .parse()
            .context("POSTBOX_PORT must be a port number")?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let defaults = Policy::default();
        let flag = |key: &str, default: bool| -> Result<bool> {
            match get(key) {
                Some(raw) => parse_bool(&raw).with_context(|| format!("{} must be true or false", key)),
                None => Ok(default),
            }
        };

        let policy = Policy {
            auth_user_list: flag("POSTBOX_AUTH_USER_LIST", defaults.auth_user_list)?,
            auth_messages: flag("POSTBOX_AUTH_MESSAGES", defaults.auth_messages)?,
            distinguish_upsert: flag("POSTBOX_DISTINGUISH_UPSERT", defaults.distinguish_upsert)?,
            placeholder_password: match get("POSTBOX_PLACEHOLDER_PASSWORD") {
                Some(p) if p.is_empty() => None,
                Some(p) => Some(p),
                None => defaults.placeholder_password,
            },
        };

        Ok(Self {
            db_path: db_path.into(),
            addr,
            policy,
        })
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("postbox.db"));
        assert_eq!(config.addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.policy, Policy::default());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("POSTBOX_DB_PATH", "/var/lib/postbox/data.db"),
            ("POSTBOX_HOST", "127.0.0.1"),
            ("POSTBOX_PORT", "9000"),
            ("POSTBOX_AUTH_MESSAGES", "false"),
            ("POSTBOX_DISTINGUISH_UPSERT", "Yes"),
            ("POSTBOX_PLACEHOLDER_PASSWORD", ""),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/postbox/data.db"));
        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());
        assert!(config.policy.auth_user_list);
        assert!(!config.policy.auth_messages);
        assert!(config.policy.distinguish_upsert);
        assert_eq!(config.policy.placeholder_password, None);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("POSTBOX_PORT", "eighty")]).is_err());
        assert!(config(&[("POSTBOX_PORT", "70000")]).is_err());
        assert!(config(&[("POSTBOX_AUTH_USER_LIST", "maybe")]).is_err());
    }
}
