//! 进程内通道
//!
//! 直接把请求交给同进程的 [`PluginService`]，消息仍按帧编码一次以保证与 TCP 路径一致。
//! 可以随时关闭以模拟插件进程退出。

use super::{codec, dispatch, PluginChannel, PluginService};
use crate::error::RpcError;
use crate::types::{methods, RpcRequest, RpcResponse};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct LocalChannel {
    name: String,
    service: Arc<dyn PluginService>,
    alive: AtomicBool,
    latency: Option<Duration>,
    served: AtomicU64,
    handshakes: AtomicU64,
}

impl LocalChannel {
    pub fn new(name: &str, service: Arc<dyn PluginService>) -> Self {
        Self {
            name: name.to_string(),
            service,
            alive: AtomicBool::new(true),
            latency: None,
            served: AtomicU64::new(0),
            handshakes: AtomicU64::new(0),
        }
    }

    /// 每次调用前附加固定延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 模拟插件退出，之后的调用以 Closed 失败
    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn restart(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// 已成功应答的请求数
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// 已应答的握手数
    pub fn handshakes(&self) -> u64 {
        self.handshakes.load(Ordering::Relaxed)
    }

    fn ensure_alive(&self) -> Result<(), RpcError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(RpcError::closed(&format!("local plugin '{}' is shut down", self.name)))
        }
    }
}

#[async_trait]
impl PluginChannel for LocalChannel {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, RpcError> {
        self.ensure_alive()?;
        let frame = codec::encode_frame(&request)?;
        let request: RpcRequest = codec::decode_frame(&frame)?;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
            // 等待期间被关闭视为连接中断
            self.ensure_alive()?;
        }

        let is_handshake = request.method == methods::HANDSHAKE;
        let response = dispatch(self.service.as_ref(), request).await;
        self.served.fetch_add(1, Ordering::Relaxed);
        if is_handshake {
            self.handshakes.fetch_add(1, Ordering::Relaxed);
        }
        let frame = codec::encode_frame(&response)?;
        codec::decode_frame(&frame)
    }

    fn endpoint(&self) -> String {
        format!("local://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    struct NullPlugin;

    #[async_trait]
    impl PluginService for NullPlugin {
        fn handshake(&self, _request: &HandshakeRequest) -> HandshakeResponse {
            HandshakeResponse {
                plugin_name: "null".to_string(),
                plugin_version: "0.0.1".to_string(),
                slot_version: "0.1.0".to_string(),
                wire_version: WIRE_VERSION,
                slots: SlotId::ALL.to_vec(),
                capabilities: vec![],
            }
        }

        async fn handle(&self, _slot: SlotId, payload: serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn test_local_channel_lifecycle() {
        let channel = LocalChannel::new("null", Arc::new(NullPlugin));
        assert_eq!(channel.endpoint(), "local://null");

        let request = RpcRequest::new(SlotId::Postprocess, methods::CALL, serde_json::json!({"gcode": ""}));
        let response = channel.call(request).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(channel.served(), 1);

        channel.shutdown();
        let request = RpcRequest::new(SlotId::Postprocess, methods::CALL, serde_json::Value::Null);
        assert!(matches!(channel.call(request).await, Err(RpcError::Closed { .. })));

        channel.restart();
        let request = RpcRequest::new(SlotId::Postprocess, methods::CALL, serde_json::Value::Null);
        assert!(channel.call(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_during_latency_fails_the_call() {
        let channel = Arc::new(LocalChannel::new("slow", Arc::new(NullPlugin)).with_latency(Duration::from_millis(50)));
        let pending = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let request = RpcRequest::new(SlotId::Simplify, methods::CALL, serde_json::Value::Null);
                channel.call(request).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.shutdown();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(RpcError::Closed { .. })));
        assert_eq!(channel.served(), 0);
    }
}
