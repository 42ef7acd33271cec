//! 插件端服务
//!
//! 插件进程通过 [`PluginService`] 回答握手与插槽调用，[`PluginServer`] 负责监听与分帧。
//! 每个请求在独立任务中处理，同一连接上的请求可以乱序完成。

use super::codec;
use crate::plugins::converters::{decode_payload, encode_payload};
use crate::plugins::slots::Slot;
use crate::types::*;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 插件服务特征
#[async_trait]
pub trait PluginService: Send + Sync {
    /// 声明插件契约
    fn handshake(&self, request: &HandshakeRequest) -> HandshakeResponse;

    /// 处理插槽调用，返回线上响应负载
    async fn handle(&self, slot: SlotId, payload: Value) -> std::result::Result<Value, String>;
}

/// 把一个请求信封交给服务处理并生成响应信封
pub async fn dispatch(service: &dyn PluginService, request: RpcRequest) -> RpcResponse {
    let id = request.id;
    if request.wire_version != WIRE_VERSION {
        return RpcResponse::error(
            id,
            format!("unsupported wire version {} (expected {})", request.wire_version, WIRE_VERSION),
        );
    }

    match request.method.as_str() {
        methods::HANDSHAKE => {
            let handshake = match serde_json::from_value::<HandshakeRequest>(request.payload) {
                Ok(handshake) => handshake,
                Err(e) => return RpcResponse::error(id, format!("invalid handshake: {}", e)),
            };
            match serde_json::to_value(service.handshake(&handshake)) {
                Ok(payload) => RpcResponse::ok(id, payload),
                Err(e) => RpcResponse::error(id, e.to_string()),
            }
        }
        methods::CALL => match service.handle(request.slot, request.payload).await {
            Ok(payload) => RpcResponse::ok(id, payload),
            Err(message) => RpcResponse::error(id, message),
        },
        other => RpcResponse::unsupported(id, format!("unknown method '{}'", other)),
    }
}

/// 插件端的类型化调用：线上请求 → 原生参数 → 处理 → 线上响应
pub fn serve_slot<S: Slot>(
    payload: Value,
    handler: impl FnOnce(S::Args) -> S::Output,
) -> std::result::Result<Value, String> {
    let args = decode_payload::<S::RequestConverter>(payload).map_err(|e| e.to_string())?;
    encode_payload::<S::ResponseConverter>(&handler(args)).map_err(|e| e.to_string())
}

/// TCP 插件服务器
pub struct PluginServer {
    listener: TcpListener,
    service: Arc<dyn PluginService>,
    shutdown: CancellationToken,
}

impl PluginServer {
    pub async fn bind(address: &str, service: Arc<dyn PluginService>) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            service,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 关闭令牌，取消后停止接受连接并断开所有现有连接
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 接受连接直到被取消
    pub async fn serve(self) -> Result<()> {
        let address = self.local_addr()?;
        info!("Plugin server listening on {}", address);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let connection_id = uuid::Uuid::new_v4().to_string();
                        debug!("Accepted connection {} from {}", connection_id, peer);
                        tokio::spawn(serve_connection(
                            socket,
                            Arc::clone(&self.service),
                            self.shutdown.child_token(),
                            connection_id,
                        ));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }

        info!("Plugin server on {} stopped", address);
        Ok(())
    }

    /// 在当前运行时中后台运行
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                error!("Plugin server failed: {}", e);
            }
        });
        Ok(ServerHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// 后台服务器句柄，丢弃时关闭服务器
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 客户端可用的连接地址
    pub fn address(&self) -> String {
        self.local_addr.to_string()
    }

    /// 停止监听并断开所有连接
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// 等待服务器任务结束
    pub async fn stopped(mut self) {
        self.shutdown.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_connection(
    socket: TcpStream,
    service: Arc<dyn PluginService>,
    shutdown: CancellationToken,
    connection_id: String,
) {
    if let Err(e) = socket.set_nodelay(true) {
        debug!("Connection {} keeps Nagle enabled: {}", connection_id, e);
    }
    let (mut sink, mut stream) = codec::framed(socket).split();
    let (responses, mut responses_rx) = mpsc::unbounded_channel::<Bytes>();

    let writer_shutdown = shutdown.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => break,
                frame = responses_rx.recv() => match frame {
                    Some(frame) => {
                        if sink.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(frame)) => {
                    let service = Arc::clone(&service);
                    let responses = responses.clone();
                    tokio::spawn(async move {
                        let response = handle_frame(service.as_ref(), &frame).await;
                        match response.and_then(|r| codec::encode_frame(&r).ok()) {
                            Some(bytes) => {
                                let _ = responses.send(bytes);
                            }
                            None => warn!("Dropping request frame without a usable id"),
                        }
                    });
                }
                Some(Err(e)) => {
                    warn!("Connection {} failed: {}", connection_id, e);
                    break;
                }
                None => break,
            },
        }
    }

    drop(responses);
    if shutdown.is_cancelled() {
        writer.abort();
    } else {
        let _ = writer.await;
    }
    debug!("Connection {} closed", connection_id);
}

/// 解码请求帧并分发；无法解码但能取回ID时回送错误
async fn handle_frame(service: &dyn PluginService, frame: &[u8]) -> Option<RpcResponse> {
    match codec::decode_frame::<RpcRequest>(frame) {
        Ok(request) => Some(dispatch(service, request).await),
        Err(e) => codec::salvage_request_id(frame).map(|id| RpcResponse::error(id, e.to_string())),
    }
}
