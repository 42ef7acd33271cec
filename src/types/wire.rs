//! 线上消息定义
//!
//! 引擎与插件进程之间传输的版本化消息。引擎代码只接触原生类型，
//! 这些结构仅由远程调用客户端与插件端读写。

use super::SlotId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 线上协议版本
pub const WIRE_VERSION: u32 = 1;

/// 请求标识
pub type RequestId = u64;

/// 远程方法名
pub mod methods {
    /// 能力声明握手
    pub const HANDSHAKE: &str = "handshake";
    /// 插槽调用
    pub const CALL: &str = "call";
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// 分配进程内唯一的请求ID，多个插槽共享同一连接时不会冲突
pub fn next_request_id() -> RequestId {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// 请求信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// 请求ID，响应以此关联
    pub id: RequestId,
    /// 线上协议版本
    pub wire_version: u32,
    /// 目标插槽
    pub slot: SlotId,
    /// 方法名
    pub method: String,
    /// 消息负载
    pub payload: serde_json::Value,
}

impl RpcRequest {
    pub fn new(slot: SlotId, method: &str, payload: serde_json::Value) -> Self {
        Self {
            id: next_request_id(),
            wire_version: WIRE_VERSION,
            slot,
            method: method.to_string(),
            payload,
        }
    }
}

/// 响应状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
    Unsupported,
}

/// 响应信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// 关联的请求ID
    pub id: RequestId,
    /// 响应状态
    pub status: ResponseStatus,
    /// 响应数据
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// 错误信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: RequestId, payload: serde_json::Value) -> Self {
        Self {
            id,
            status: ResponseStatus::Ok,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ResponseStatus::Error,
            payload: None,
            error: Some(message.into()),
        }
    }

    pub fn unsupported(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ResponseStatus::Unsupported,
            payload: None,
            error: Some(message.into()),
        }
    }
}

/// 握手请求：引擎告知插件自己期望的插槽版本范围
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub engine_name: String,
    pub engine_version: String,
    pub slot: SlotId,
    pub version_range: String,
}

/// 握手响应：插件声明的契约
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub plugin_name: String,
    pub plugin_version: String,
    /// 插件实现的插槽协议版本
    pub slot_version: String,
    /// 插件使用的线上协议版本
    pub wire_version: u32,
    /// 插件实现的插槽
    #[serde(default)]
    pub slots: Vec<SlotId>,
    /// 能力标识
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// 多边形集合的线上形式：每条路径为扁平的 x,y 坐标序列
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolygonsMessage {
    pub paths: Vec<Vec<i64>>,
}

/// 简化插槽请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifyRequest {
    pub polygons: PolygonsMessage,
    pub max_resolution: u64,
    pub max_deviation: u64,
    pub max_area_deviation: u64,
}

/// 简化插槽响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifyResponse {
    pub polygons: PolygonsMessage,
}

/// 后处理插槽请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostprocessRequest {
    pub gcode: String,
}

/// 后处理插槽响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostprocessResponse {
    pub gcode: String,
}

/// 填充生成插槽请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfillRequest {
    pub outline: PolygonsMessage,
    pub pattern: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// 填充生成插槽响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfillResponse {
    #[serde(default)]
    pub lines: Vec<Vec<i64>>,
    #[serde(default)]
    pub polygons: PolygonsMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RpcRequest::new(SlotId::Simplify, methods::CALL, serde_json::Value::Null);
        let b = RpcRequest::new(SlotId::Simplify, methods::CALL, serde_json::Value::Null);
        assert_ne!(a.id, b.id);
        assert_eq!(a.wire_version, WIRE_VERSION);
    }

    #[test]
    fn test_response_omits_empty_fields() {
        let response = RpcResponse::ok(7, serde_json::json!({"gcode": "G1"}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(!json.contains("error"));

        let response = RpcResponse::error(8, "boom");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], "boom");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_handshake_capabilities_default_to_empty() {
        let json = serde_json::json!({
            "plugin_name": "p",
            "plugin_version": "1.0.0",
            "slot_version": "0.1.0",
            "wire_version": 1
        });
        let handshake: HandshakeResponse = serde_json::from_value(json).unwrap();
        assert!(handshake.capabilities.is_empty());
    }
}
