//! slotwire - 插槽式插件绑定层
//!
//! 让单体计算引擎把命名的计算步骤（插槽）委托给通过远程调用通道连接的进程外插件，
//! 同时保证在没有插件、插件不兼容或连接异常时引擎始终以内建默认行为继续工作。
//!
//! # 架构分层
//!
//! - **插槽前端**: 统一的同步调用入口，绑定或回退到默认行为
//! - **远程调用客户端**: 转换 → 远程调用 → 转换，失败以类型化错误返回
//! - **能力校验器**: 绑定时对插件声明的契约校验一次
//! - **值转换层**: 原生值与线上消息的双向映射
//! - **通信通道**: 分帧、多路复用的请求/响应传输

pub mod config;
pub mod error;
pub mod plugins;
pub mod transport;
pub mod types;

// 重新导出核心类型
pub use config::{ConfigManager, EngineConfig, LogLevel, LoggingConfig, PluginBinding, RpcSettings};
pub use error::*;
pub use plugins::*;
pub use transport::{LocalChannel, PluginChannel, PluginServer, PluginService, RpcRuntime, ServerHandle, TcpChannel};
pub use types::*;

/// 框架信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FRAMEWORK_NAME: &str = "slotwire";

/// 覆盖配置日志级别的环境变量
pub const LOG_LEVEL_ENV: &str = "SLOTWIRE_LOG_LEVEL";

/// 确定实际日志级别，环境变量优先；无法解析的取值被忽略
pub fn resolve_log_level(config: &LoggingConfig, env_value: Option<&str>) -> LogLevel {
    env_value
        .and_then(|value| value.parse::<LogLevel>().ok())
        .unwrap_or(config.level)
}

/// 初始化日志系统
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_value = std::env::var(LOG_LEVEL_ENV).ok();
    let level = resolve_log_level(config, env_value.as_deref());

    tracing_subscriber::fmt()
        .with_max_level(level.as_tracing())
        .with_target(false)
        .try_init()
        .map_err(|e| SlotwireError::runtime(&format!("Failed to install log subscriber: {}", e)))?;

    tracing::info!("Initialized {} v{} (log level {:?})", FRAMEWORK_NAME, VERSION, level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_info() {
        assert_eq!(FRAMEWORK_NAME, "slotwire");
        assert!(!VERSION.is_empty());
        assert!(semver::Version::parse(VERSION).is_ok());
    }

    #[test]
    fn test_second_logging_init_reports_failure() {
        let config = LoggingConfig { level: LogLevel::Debug };
        let _ = init_logging(&config);
        let err = init_logging(&config).unwrap_err();
        assert!(err.to_string().contains("Failed to install log subscriber"));
    }

    #[test]
    fn test_env_overrides_configured_level() {
        let config = LoggingConfig { level: LogLevel::Warn };
        assert_eq!(resolve_log_level(&config, None), LogLevel::Warn);
        assert_eq!(resolve_log_level(&config, Some("trace")), LogLevel::Trace);
        assert_eq!(resolve_log_level(&config, Some("nonsense")), LogLevel::Warn);
    }
}
