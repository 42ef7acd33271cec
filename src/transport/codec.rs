//! 帧编解码
//!
//! 4 字节大端长度前缀 + JSON 消息体

use crate::error::RpcError;
use crate::types::RequestId;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// 单帧上限
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// 以长度前缀分帧
pub fn framed<T: AsyncRead + AsyncWrite>(io: T) -> Framed<T, LengthDelimitedCodec> {
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    Framed::new(io, codec)
}

pub fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes, RpcError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| RpcError::malformed(&format!("failed to encode frame: {}", e)))
}

pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, RpcError> {
    serde_json::from_slice(frame).map_err(|e| RpcError::malformed(&format!("failed to decode frame: {}", e)))
}

/// 从无法完整解码的帧中尽量取回请求ID，便于把错误送回等待方
pub fn salvage_request_id(frame: &[u8]) -> Option<RequestId> {
    serde_json::from_slice::<serde_json::Value>(frame)
        .ok()?
        .get("id")?
        .as_u64()
}
