//! 配置管理
//!
//! 配置来源依次为内置默认值、可选的配置文件和 `OPD_` 前缀的环境变量，
//! 环境变量中用 `__` 分隔配置段，例如 `OPD_WORKFLOW__MINUTES_PER_PATIENT=8`。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 支持的日志输出格式
pub const LOG_FORMATS: [&str; 2] = ["compact", "full"];

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: RwLock<OpdConfig>,
    /// 配置文件路径，未指定时不落盘
    config_path: Option<PathBuf>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 门诊工作流系统配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpdConfig {
    /// 工作流配置
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// 存储配置
    #[serde(default)]
    pub store: StoreConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 工作流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// 每位患者的接诊时长（分钟）
    pub minutes_per_patient: u32,
    /// 是否允许人工取消就诊
    pub allow_cancellation: bool,
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// 变更通知缓冲区大小
    pub change_feed_capacity: usize,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令
    pub level: String,
    /// 输出格式
    pub format: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            minutes_per_patient: 5,
            allow_cancellation: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            change_feed_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        Self::with_config(config, config_path.map(PathBuf::from))
    }

    /// 使用已有配置创建管理器
    pub fn with_config(config: OpdConfig, config_path: Option<PathBuf>) -> Result<Self> {
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: RwLock::new(config),
            config_path,
            validator,
        })
    }

    /// 加载配置
    fn load_config(config_path: Option<&str>) -> Result<OpdConfig> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&OpdConfig::default()).context("Failed to build default configuration")?);

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("OPD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: OpdConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        debug!("Configuration loaded from {}", config_path.unwrap_or("defaults and environment"));
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> OpdConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 更新配置
    pub async fn update_config(&self, new_config: OpdConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        self.save_config().await?;

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };

        let config = self.config.read().await;
        let config_str = toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let path = self.config_path.as_ref().map(|p| p.to_string_lossy().into_owned());
        let new_config = Self::load_config(path.as_deref())?;
        self.update_config(new_config).await
    }

    /// 按点分路径获取配置值，例如 `workflow.minutes_per_patient`
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config = self.config.read().await;
        let value = Self::extract_nested_value(&config, path)
            .with_context(|| format!("Configuration path not found: {}", path))?;

        serde_json::from_value(value).context("Failed to deserialize configuration value")
    }

    fn extract_nested_value(config: &OpdConfig, path: &str) -> Result<serde_json::Value> {
        let config_json = serde_json::to_value(config).context("Failed to serialize config to JSON")?;

        let mut current = &config_json;
        for part in path.split('.') {
            match current {
                serde_json::Value::Object(map) => {
                    current = map
                        .get(part)
                        .ok_or_else(|| anyhow::anyhow!("Path segment not found: {}", part))?;
                }
                _ => return Err(anyhow::anyhow!("Invalid path at segment: {}", part)),
            }
        }

        Ok(current.clone())
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&OpdConfig) -> Result<()>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "workflow.minutes_per_patient",
                validator: |config| {
                    if config.workflow.minutes_per_patient == 0 {
                        Err(anyhow::anyhow!("Minutes per patient cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "store.change_feed_capacity",
                validator: |config| {
                    if config.store.change_feed_capacity == 0 {
                        Err(anyhow::anyhow!("Change feed capacity cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |config| {
                    tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                        .map(|_| ())
                        .map_err(|e| anyhow::anyhow!("Invalid log filter '{}': {}", config.logging.level, e))
                },
            },
            ValidationRule {
                field_path: "logging.format",
                validator: |config| {
                    if LOG_FORMATS.contains(&config.logging.format.as_str()) {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!(
                            "Unsupported log format '{}', expected one of {:?}",
                            config.logging.format,
                            LOG_FORMATS
                        ))
                    }
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &OpdConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(e.context(format!("Invalid configuration value: {}", rule.field_path)));
            }
        }

        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir().join(format!("opd-config-{}.toml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = OpdConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.workflow.minutes_per_patient, 5);
        assert!(config.workflow.allow_cancellation);
        assert_eq!(config.store.change_feed_capacity, 256);
    }

    #[test]
    fn test_validator_rejects_bad_values() {
        let validator = ConfigValidator::new();

        let mut config = OpdConfig::default();
        config.workflow.minutes_per_patient = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = OpdConfig::default();
        config.store.change_feed_capacity = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = OpdConfig::default();
        config.logging.format = "xml".to_string();
        assert!(validator.validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_get_value_by_path() {
        let manager = ConfigManager::with_config(OpdConfig::default(), None).unwrap();

        let minutes: u32 = manager.get_value("workflow.minutes_per_patient").await.unwrap();
        assert_eq!(minutes, 5);

        let level: String = manager.get_value("logging.level").await.unwrap();
        assert_eq!(level, "info");

        assert!(manager.get_value::<u32>("workflow.unknown").await.is_err());
        assert!(manager.get_value::<u32>("workflow.minutes_per_patient.deeper").await.is_err());
    }

    #[tokio::test]
    async fn test_load_partial_file_keeps_defaults() {
        let path = temp_config_path();
        tokio::fs::write(&path, "[workflow]\nminutes_per_patient = 7\n").await.unwrap();

        let manager = ConfigManager::new(path.to_str()).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.workflow.minutes_per_patient, 7);
        assert!(config.workflow.allow_cancellation);
        assert_eq!(config.logging, LoggingConfig::default());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_config_persists_and_validates() {
        let path = temp_config_path();
        tokio::fs::write(&path, "").await.unwrap();
        let manager = ConfigManager::new(path.to_str()).unwrap();

        let mut updated = manager.get_config().await;
        updated.workflow.allow_cancellation = false;
        manager.update_config(updated.clone()).await.unwrap();

        let saved = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: OpdConfig = toml::from_str(&saved).unwrap();
        assert_eq!(parsed, updated);

        let mut invalid = updated.clone();
        invalid.workflow.minutes_per_patient = 0;
        assert!(manager.update_config(invalid).await.is_err());
        assert_eq!(manager.get_config().await, updated);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_picks_up_file_changes() {
        let path = temp_config_path();
        tokio::fs::write(&path, "[workflow]\nminutes_per_patient = 7\n").await.unwrap();
        let manager = ConfigManager::new(path.to_str()).unwrap();

        tokio::fs::write(&path, "[workflow]\nminutes_per_patient = 12\nallow_cancellation = false\n")
            .await
            .unwrap();
        manager.reload_config().await.unwrap();

        let config = manager.get_config().await;
        assert_eq!(config.workflow.minutes_per_patient, 12);
        assert!(!config.workflow.allow_cancellation);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = temp_config_path();
        assert!(ConfigManager::new(path.to_str()).is_err());
    }
}
