//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{caip, CaipNetwork, CaipNetworkId};
use crate::error::AppKitError;
use crate::infrastructure::{FileStorage, PersistedState};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project_id: String,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// CAIP-2 网络 id 列表
    #[serde(default = "default_networks")]
    pub networks: Vec<String>,
    #[serde(default)]
    pub default_network: Option<String>,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub siwx: SiwxConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// dApp 元数据（展示在钱包中）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// 功能开关
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    pub enable_network_switch: bool,
    pub allow_unsupported_chain: bool,
    pub email: bool,
    pub socials: bool,
}

/// SIWX 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiwxConfig {
    pub enabled: bool,
    pub required: bool,
    pub sign_out_on_disconnect: bool,
    pub domain: String,
    pub uri: String,
    pub statement: Option<String>,
    pub expiration_secs: u64,
    pub social_login_timeout_secs: u64,
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// memory | file
    pub backend: String,
    pub path: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    #[serde(default = "default_true")]
    pub with_target: bool,
    #[serde(default = "default_true")]
    pub ansi: bool,
}

fn default_true() -> bool {
    true
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn default_networks() -> Vec<String> {
    match std::env::var("APPKIT_NETWORKS") {
        Ok(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Err(_) => vec![
            "eip155:1".to_string(),
            "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp".to_string(),
            "bip122:000000000019d6689c085ae165831e93".to_string(),
        ],
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            name: std::env::var("APPKIT_APP_NAME").unwrap_or_else(|_| "AppKit".into()),
            description: std::env::var("APPKIT_APP_DESCRIPTION").unwrap_or_default(),
            url: std::env::var("APPKIT_APP_URL").unwrap_or_else(|_| "http://localhost".into()),
            icons: Vec::new(),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            enable_network_switch: env_flag("APPKIT_ENABLE_NETWORK_SWITCH", true),
            allow_unsupported_chain: env_flag("APPKIT_ALLOW_UNSUPPORTED_CHAIN", false),
            email: env_flag("APPKIT_FEATURE_EMAIL", true),
            socials: env_flag("APPKIT_FEATURE_SOCIALS", true),
        }
    }
}

impl Default for SiwxConfig {
    fn default() -> Self {
        Self {
            enabled: env_flag("APPKIT_SIWX_ENABLED", false),
            required: env_flag("APPKIT_SIWX_REQUIRED", false),
            sign_out_on_disconnect: env_flag("APPKIT_SIWX_SIGN_OUT_ON_DISCONNECT", true),
            domain: std::env::var("APPKIT_SIWX_DOMAIN").unwrap_or_else(|_| "localhost".into()),
            uri: std::env::var("APPKIT_SIWX_URI").unwrap_or_else(|_| "http://localhost".into()),
            statement: std::env::var("APPKIT_SIWX_STATEMENT").ok(),
            expiration_secs: env_u64("APPKIT_SIWX_EXPIRATION_SECS", 24 * 60 * 60),
            social_login_timeout_secs: env_u64("APPKIT_SOCIAL_LOGIN_TIMEOUT_SECS", 45),
        }
    }
}

impl SiwxConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    /// 社交登录弹窗的认证超时
    pub fn social_login_timeout(&self) -> Duration {
        Duration::from_secs(self.social_login_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: std::env::var("APPKIT_STORAGE").unwrap_or_else(|_| "memory".into()),
            path: std::env::var("APPKIT_STORAGE_PATH").ok(),
        }
    }
}

impl StorageConfig {
    pub fn open(&self) -> crate::error::Result<PersistedState> {
        match self.backend.as_str() {
            "memory" => Ok(PersistedState::in_memory()),
            "file" => {
                let path = self.path.as_deref().unwrap_or("./appkit-storage.json");
                Ok(PersistedState::new(Arc::new(FileStorage::new(path))))
            }
            other => Err(AppKitError::Configuration(format!(
                "unknown storage backend: {}",
                other
            ))),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            with_target: true,
            ansi: true,
        }
    }
}

impl Config {
    /// 从环境变量加载配置（先读取 .env）
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            project_id: std::env::var("APPKIT_PROJECT_ID").unwrap_or_default(),
            metadata: MetadataConfig::default(),
            networks: default_networks(),
            default_network: std::env::var("APPKIT_DEFAULT_NETWORK").ok(),
            features: FeaturesConfig::default(),
            siwx: SiwxConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 配置文件存在时优先使用文件
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 启动时校验，失败即致命
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(AppKitError::MissingProjectId);
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(AppKitError::Configuration(format!(
                "LOG_LEVEL must be one of: {:?}",
                valid_levels
            )));
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            return Err(AppKitError::Configuration(
                "LOG_FORMAT must be 'json' or 'text'".to_string(),
            ));
        }

        let networks = self.resolve_networks()?;
        if networks.is_empty() {
            return Err(AppKitError::Configuration(
                "at least one network is required".to_string(),
            ));
        }
        self.default_caip_network()?;

        if !matches!(self.storage.backend.as_str(), "memory" | "file") {
            return Err(AppKitError::Configuration(format!(
                "unknown storage backend: {}",
                self.storage.backend
            )));
        }

        Ok(())
    }

    /// 把配置的网络 id 映射到内置网络
    pub fn resolve_networks(&self) -> crate::error::Result<Vec<CaipNetwork>> {
        self.networks
            .iter()
            .map(|raw| {
                let id: CaipNetworkId = raw.parse()?;
                caip::find_preset(&id).ok_or_else(|| {
                    AppKitError::Configuration(format!("unknown network: {}", raw))
                })
            })
            .collect()
    }

    /// 默认网络必须出现在网络列表中
    pub fn default_caip_network(&self) -> crate::error::Result<Option<CaipNetwork>> {
        let Some(raw) = &self.default_network else {
            return Ok(None);
        };
        let id: CaipNetworkId = raw.parse()?;
        self.resolve_networks()?
            .into_iter()
            .find(|n| n.caip_network_id == id)
            .map(Some)
            .ok_or_else(|| {
                AppKitError::Configuration(format!("default network {} is not in networks", raw))
            })
    }
}
