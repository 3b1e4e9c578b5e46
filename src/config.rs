use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LokiError, Result};

pub const ENV_LOKI_URL: &str = "LOKI_URL";
pub const ENV_LOKI_ORG_ID: &str = "LOKI_ORG_ID";
pub const ENV_LOKI_USERNAME: &str = "LOKI_USERNAME";
pub const ENV_LOKI_PASSWORD: &str = "LOKI_PASSWORD";
pub const ENV_LOKI_TOKEN: &str = "LOKI_TOKEN";

/// 未配置 LOKI_URL 时使用的后端地址
pub const DEFAULT_LOKI_URL: &str = "http://localhost:3100";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Stdio,
    Http,
    Both,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    pub http_addr: Option<String>,
    pub http_port: Option<u16>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.http_addr.as_deref().unwrap_or("0.0.0.0"),
            self.http_port.unwrap_or(3000)
        )
    }
}

/// Environment-sourced defaults for every tool call.
///
/// Built once at startup and handed to the parameter resolver, so request
/// handling never reads the process environment directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LokiDefaults {
    pub url: Option<String>,
    pub org_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl LokiDefaults {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build defaults from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            url: get(ENV_LOKI_URL),
            org_id: get(ENV_LOKI_ORG_ID),
            username: get(ENV_LOKI_USERNAME),
            password: get(ENV_LOKI_PASSWORD),
            token: get(ENV_LOKI_TOKEN),
        }
    }

    /// Fields set in `other` win over the ones in `self`.
    pub fn overlay(self, other: LokiDefaults) -> Self {
        Self {
            url: other.url.or(self.url),
            org_id: other.org_id.or(self.org_id),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
            token: other.token.or(self.token),
        }
    }

    pub fn effective_url(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_LOKI_URL)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub loki: LokiDefaults,
}

impl Config {
    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LokiError::ConfigError(format!("read {} failed: {e}", path.display()))
        })?;
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .map_err(|e| LokiError::ConfigError(format!("yaml: {e}"))),
            Some("json") => serde_json::from_str(&raw)
                .map_err(|e| LokiError::ConfigError(format!("json: {e}"))),
            other => Err(LokiError::ConfigError(format!(
                "unsupported config extension: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// 环境变量优先于配置文件中的 loki 段
    pub fn with_env_overrides(mut self) -> Self {
        self.loki = self.loki.overlay(LokiDefaults::from_env());
        self
    }
}
