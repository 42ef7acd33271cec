//! slotwire 错误处理系统
//!
//! 按照绑定期、调用期、转换期三类划分的错误类型

use crate::types::SlotId;
use thiserror::Error;

/// 调用期传输错误
///
/// 这些错误在远程调用客户端边界被捕获，由插槽前端降级为默认行为
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Channel closed: {message}")]
    Closed { message: String },

    #[error("Remote call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed frame: {message}")]
    Malformed { message: String },

    #[error("Plugin reported failure: {message}")]
    Remote { message: String },

    #[error("IO error: {message}")]
    Io { message: String },
}

impl RpcError {
    /// 创建通道关闭错误
    pub fn closed(message: &str) -> Self {
        Self::Closed {
            message: message.to_string(),
        }
    }

    /// 创建帧格式错误
    pub fn malformed(message: &str) -> Self {
        Self::Malformed {
            message: message.to_string(),
        }
    }

    /// 创建远端失败错误
    pub fn remote(message: &str) -> Self {
        Self::Remote {
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

/// 值转换错误
///
/// 表示引擎与插件之间契约不一致，重试无法修复
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Cannot encode {what}: {message}")]
    Encode { what: String, message: String },

    #[error("Cannot decode {what}: {message}")]
    Decode { what: String, message: String },
}

impl ConversionError {
    pub fn encode(what: &str, message: impl std::fmt::Display) -> Self {
        Self::Encode {
            what: what.to_string(),
            message: message.to_string(),
        }
    }

    pub fn decode(what: &str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            what: what.to_string(),
            message: message.to_string(),
        }
    }
}

/// 单次远程调用的失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// 可降级的传输失败
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// 契约不一致，必须向上传播
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// 绑定期错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("Plugin at '{endpoint}' is unreachable: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("Handshake with '{endpoint}' failed: {source}")]
    Handshake {
        endpoint: String,
        #[source]
        source: RpcError,
    },

    #[error("Plugin '{plugin}' rejected for slot '{slot}': {reason}")]
    Rejected {
        slot: SlotId,
        plugin: String,
        reason: String,
    },

    #[error("Unknown slot '{name}'")]
    UnknownSlot { name: String },
}

/// 框架统一错误类型
#[derive(Error, Debug)]
pub enum SlotwireError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Runtime error: {message}")]
    Runtime { message: String },
}

impl SlotwireError {
    /// 创建配置相关错误
    pub fn config(message: &str) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    /// 创建运行时相关错误
    pub fn runtime(message: &str) -> Self {
        Self::Runtime {
            message: message.to_string(),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, SlotwireError>;
