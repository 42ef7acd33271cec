//! slotwire 配置管理
//!
//! 支持YAML或TOML配置文件驱动的插件绑定

use crate::error::SlotwireError;
use crate::types::SlotId;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 引擎基础设置
    pub engine: EngineSettings,
    /// 远程调用设置
    #[serde(default)]
    pub rpc: RpcSettings,
    /// 插槽绑定
    #[serde(default)]
    pub plugins: Vec<PluginBinding>,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 引擎基础设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// 引擎名称
    pub name: String,
    /// 版本
    pub version: String,
}

/// 远程调用设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    /// 连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 单次调用超时（毫秒），握手同样适用
    pub call_timeout_ms: u64,
    /// 远程调用运行时的工作线程数
    pub worker_threads: usize,
}

impl RpcSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
            call_timeout_ms: 10000,
            worker_threads: num_cpus::get(),
        }
    }
}

/// 插槽绑定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginBinding {
    /// 目标插槽
    pub slot: SlotId,
    /// 插件地址（host:port）
    pub address: String,
    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default)]
    pub level: LogLevel,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = SlotwireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(SlotwireError::config(&format!("Unknown log level '{}'", other))),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings {
                name: crate::FRAMEWORK_NAME.to_string(),
                version: crate::VERSION.to_string(),
            },
            rpc: RpcSettings::default(),
            plugins: vec![
                PluginBinding {
                    slot: SlotId::Simplify,
                    address: "127.0.0.1:33700".to_string(),
                    enabled: false,
                },
                PluginBinding {
                    slot: SlotId::Postprocess,
                    address: "127.0.0.1:33700".to_string(),
                    enabled: false,
                },
                PluginBinding {
                    slot: SlotId::InfillGenerate,
                    address: "127.0.0.1:33700".to_string(),
                    enabled: false,
                },
            ],
            logging: LoggingConfig::default(),
        }
    }
}

/// 配置文件格式，按扩展名判断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: EngineConfig,
}

impl ConfigManager {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// 从文件加载配置
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SlotwireError::config(&format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config = Self::parse(&content, ConfigFormat::from_path(path))?;
        Ok(Self { config })
    }

    fn parse(content: &str, format: ConfigFormat) -> Result<EngineConfig> {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| SlotwireError::config(&format!("Failed to parse config file: {}", e))),
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| SlotwireError::config(&format!("Failed to parse config file: {}", e))),
        }
    }

    /// 创建默认配置
    pub fn new_default() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// 保存配置到文件
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Yaml => serde_yaml::to_string(&self.config)
                .map_err(|e| SlotwireError::config(&format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Toml => toml::to_string_pretty(&self.config)
                .map_err(|e| SlotwireError::config(&format!("Failed to serialize config: {}", e)))?,
        };

        tokio::fs::write(path, content)
            .await
            .map_err(|e| SlotwireError::config(&format!("Failed to write config file {}: {}", path.display(), e)))?;

        Ok(())
    }

    /// 获取配置
    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    /// 获取可变配置
    pub fn get_config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    /// 获取启用的绑定
    pub fn get_enabled_bindings(&self) -> Vec<&PluginBinding> {
        self.config.plugins.iter().filter(|b| b.enabled).collect()
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.config.engine.name.is_empty() {
            return Err(SlotwireError::config("Engine name cannot be empty"));
        }

        let rpc = &self.config.rpc;
        if rpc.connect_timeout_ms == 0 || rpc.call_timeout_ms == 0 {
            return Err(SlotwireError::config("RPC timeouts must be positive"));
        }
        if rpc.worker_threads == 0 {
            return Err(SlotwireError::config("RPC runtime needs at least one worker thread"));
        }

        let mut seen = HashSet::new();
        for binding in self.get_enabled_bindings() {
            if binding.address.trim().is_empty() {
                return Err(SlotwireError::config(&format!(
                    "Plugin address for slot '{}' cannot be empty",
                    binding.slot
                )));
            }
            if !seen.insert(binding.slot) {
                return Err(SlotwireError::config(&format!(
                    "Slot '{}' has more than one enabled binding",
                    binding.slot
                )));
            }
        }

        tracing::info!("Configuration validation passed");
        Ok(())
    }
}

/// 生成默认配置文件
pub async fn generate_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let config_manager = ConfigManager::new_default();
    config_manager.save_to_file(path).await?;
    Ok(())
}
