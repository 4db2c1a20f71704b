use std::path::PathBuf;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub enum ConfigLoadOption {
    #[default]
    Default,

    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryConfig {
    /// `spec.retryTimeout` がないときのリトライ時間 (ms)
    pub timeout_ms: u64,

    /// リトライ間隔の下限 (ms)
    pub min_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            min_wait_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WatchConfig {
    pub timeout_secs: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { timeout_secs: 180 }
    }
}

/// operator はヘッドレスで動くので、デフォルトで有効
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,

    /// None なら全ネームスペースを監視する
    #[serde(default)]
    pub namespace: Option<String>,

    pub kustomize_bin: String,

    pub field_manager: String,

    #[serde(default)]
    pub set_owner_references: bool,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            namespace: None,
            kustomize_bin: "kustomize".to_string(),
            field_manager: "kustomize-operator".to_string(),
            set_owner_references: false,
            retry: RetryConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load(option: ConfigLoadOption) -> Result<Self> {
        let figment = Figment::new();

        let config = match option {
            ConfigLoadOption::Default => figment.merge(Serialized::defaults(Self::default())),
            ConfigLoadOption::Path(path) => figment
                .merge(Serialized::defaults(Self::default()))
                .merge(Yaml::file(path)),
        }
        .merge(Env::prefixed("KUSTOMIZE_OPERATOR_").split("__"))
        .extract()?;

        Ok(config)
    }
}
