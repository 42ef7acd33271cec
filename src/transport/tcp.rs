//! TCP 通道
//!
//! 单连接多路复用：写任务串行发送请求帧，读任务按请求ID把响应分发给等待方。
//! 连接断开后所有等待中和之后的请求都以 `RpcError::Closed` 失败。

use super::codec;
use super::PluginChannel;
use crate::error::{BindError, RpcError};
use crate::types::{RequestId, RpcRequest, RpcResponse};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;
type Pending = DashMap<RequestId, oneshot::Sender<Result<RpcResponse, RpcError>>>;

/// 等待方被丢弃（例如超时）时清理挂起表
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// 基于 TCP 的插件通道
pub struct TcpChannel {
    endpoint: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl TcpChannel {
    /// 建立连接并启动读写任务，必须在 tokio 运行时上下文中调用
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<Self, BindError> {
        let unreachable = |message: String| BindError::Unreachable {
            endpoint: address.to_string(),
            message,
        };

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| unreachable(format!("connect timed out after {} ms", connect_timeout.as_millis())))?
            .map_err(|e| unreachable(e.to_string()))?;
        stream.set_nodelay(true).map_err(|e| unreachable(e.to_string()))?;

        let (sink, stream) = codec::framed(stream).split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        tokio::spawn(Self::writer_loop(sink, outbound_rx, Arc::clone(&closed), shutdown.clone()));
        tokio::spawn(Self::reader_loop(
            stream,
            Arc::clone(&pending),
            Arc::clone(&closed),
            shutdown.clone(),
            address.to_string(),
        ));

        debug!("Connected to plugin at {}", address);
        Ok(Self {
            endpoint: address.to_string(),
            outbound,
            pending,
            closed,
            shutdown,
        })
    }

    /// 主动关闭连接
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 等待响应的请求数
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    async fn writer_loop(
        mut sink: SplitSink<FramedStream, Bytes>,
        mut outbound: mpsc::UnboundedReceiver<Bytes>,
        closed: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            warn!("Failed to write frame: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        closed.store(true, Ordering::SeqCst);
        shutdown.cancel();
    }

    async fn reader_loop(
        mut stream: SplitStream<FramedStream>,
        pending: Arc<Pending>,
        closed: Arc<AtomicBool>,
        shutdown: CancellationToken,
        endpoint: String,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => Self::route_frame(&pending, &frame),
                    Some(Err(e)) => {
                        warn!("Connection to {} failed: {}", endpoint, e);
                        break;
                    }
                    None => {
                        debug!("Connection to {} closed by peer", endpoint);
                        break;
                    }
                },
            }
        }
        closed.store(true, Ordering::SeqCst);
        shutdown.cancel();
        // 丢弃发送端，等待方收到 Closed
        pending.clear();
    }

    fn route_frame(pending: &Pending, frame: &[u8]) {
        match codec::decode_frame::<RpcResponse>(frame) {
            Ok(response) => match pending.remove(&response.id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(Ok(response));
                }
                None => debug!("Dropping response for unknown request {}", response.id),
            },
            Err(e) => match codec::salvage_request_id(frame).and_then(|id| pending.remove(&id)) {
                Some((_, waiter)) => {
                    let _ = waiter.send(Err(e));
                }
                None => warn!("Dropping unroutable frame: {}", e),
            },
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl PluginChannel for TcpChannel {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, RpcError> {
        if self.is_closed() {
            return Err(RpcError::closed(&format!("connection to {} is closed", self.endpoint)));
        }

        let frame = codec::encode_frame(&request)?;
        let (waiter, response) = oneshot::channel();
        self.pending.insert(request.id, waiter);
        let _guard = PendingGuard {
            pending: self.pending.as_ref(),
            id: request.id,
        };

        // 读任务可能在插入前已经清空挂起表
        if self.is_closed() || self.outbound.send(frame).is_err() {
            return Err(RpcError::closed(&format!("connection to {} is closed", self.endpoint)));
        }

        match response.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::closed(&format!(
                "connection to {} dropped while awaiting response",
                self.endpoint
            ))),
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{methods, SlotId};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpChannel::connect(&address, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(BindError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn test_responses_are_routed_by_id_out_of_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        // 收齐两个请求后倒序应答
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = codec::framed(socket);
            let mut requests = Vec::new();
            while requests.len() < 2 {
                let frame = framed.next().await.unwrap().unwrap();
                requests.push(codec::decode_frame::<RpcRequest>(&frame).unwrap());
            }
            for request in requests.into_iter().rev() {
                let response = RpcResponse::ok(request.id, request.payload);
                framed.send(codec::encode_frame(&response).unwrap()).await.unwrap();
            }
        });

        let channel = TcpChannel::connect(&address, Duration::from_secs(1)).await.unwrap();
        let first = RpcRequest::new(SlotId::Postprocess, methods::CALL, serde_json::json!("first"));
        let second = RpcRequest::new(SlotId::Postprocess, methods::CALL, serde_json::json!("second"));
        let (a, b) = tokio::join!(channel.call(first.clone()), channel.call(second.clone()));

        assert_eq!(a.unwrap().payload, Some(serde_json::json!("first")));
        assert_eq!(b.unwrap().payload, Some(serde_json::json!("second")));
        assert_eq!(channel.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_peer_disconnect_fails_pending_calls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = codec::framed(socket);
            let _ = framed.next().await;
            // 不应答直接断开
        });

        let channel = TcpChannel::connect(&address, Duration::from_secs(1)).await.unwrap();
        let request = RpcRequest::new(SlotId::Simplify, methods::CALL, serde_json::Value::Null);
        let err = channel.call(request).await.unwrap_err();
        assert!(matches!(err, RpcError::Closed { .. }));

        // 读任务退出后通道保持关闭
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(channel.is_closed());
        let request = RpcRequest::new(SlotId::Simplify, methods::CALL, serde_json::Value::Null);
        assert!(matches!(channel.call(request).await, Err(RpcError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_and_later_calls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        // 读取请求但从不应答，随后等待对端断开
        let peer = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = codec::framed(socket);
            let _ = framed.next().await;
            framed.next().await.is_none()
        });

        let channel = Arc::new(TcpChannel::connect(&address, Duration::from_secs(1)).await.unwrap());
        let in_flight = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let request = RpcRequest::new(SlotId::Postprocess, methods::CALL, serde_json::Value::Null);
                channel.call(request).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(channel.pending_requests(), 1);

        channel.close();
        assert!(channel.is_closed());
        assert!(matches!(in_flight.await.unwrap(), Err(RpcError::Closed { .. })));

        let request = RpcRequest::new(SlotId::Postprocess, methods::CALL, serde_json::Value::Null);
        assert!(matches!(channel.call(request).await, Err(RpcError::Closed { .. })));
        assert!(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_response_with_id_reaches_the_caller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = codec::framed(socket);
            let frame = framed.next().await.unwrap().unwrap();
            let request: RpcRequest = codec::decode_frame(&frame).unwrap();
            let bogus = serde_json::json!({"id": request.id, "status": "exploded"});
            framed.send(Bytes::from(bogus.to_string())).await.unwrap();
            let _ = framed.next().await;
        });

        let channel = TcpChannel::connect(&address, Duration::from_secs(1)).await.unwrap();
        let request = RpcRequest::new(SlotId::Simplify, methods::CALL, serde_json::Value::Null);
        let err = channel.call(request).await.unwrap_err();
        assert!(matches!(err, RpcError::Malformed { .. }));
        assert!(!channel.is_closed());
    }
}
