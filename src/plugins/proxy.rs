//! 远程调用客户端
//!
//! 为单个插槽持有一条插件通道：绑定时握手并校验一次，之后每次调用执行
//! 转换 → 远程调用 → 转换 的同步交换。

use super::converters::{decode_payload, encode_payload};
use super::slots::Slot;
use super::validator::{CapabilityValidator, ValidationOutcome};
use crate::error::{BindError, CallError, RpcError};
use crate::transport::{run_blocking, PluginChannel, RpcRuntime};
use crate::types::*;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// 客户端统计信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyMetrics {
    /// 成功的远程调用次数
    pub calls: u64,
    /// 传输失败次数
    pub transport_failures: u64,
    /// 转换失败次数
    pub conversion_failures: u64,
    /// 最近一次失败时间
    pub last_failure: Option<TimestampNs>,
    /// 最近一次失败原因
    pub last_error: Option<String>,
    /// 平均调用耗时（毫秒）
    pub average_latency_ms: f64,
}

#[derive(Default)]
struct MetricsCell {
    calls: AtomicU64,
    transport_failures: AtomicU64,
    conversion_failures: AtomicU64,
    total_latency_us: AtomicU64,
    last_failure: Mutex<Option<(TimestampNs, String)>>,
}

impl MetricsCell {
    fn record_failure(&self, error: &CallError) {
        match error {
            CallError::Rpc(_) => self.transport_failures.fetch_add(1, Ordering::Relaxed),
            CallError::Conversion(_) => self.conversion_failures.fetch_add(1, Ordering::Relaxed),
        };
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        *self.last_failure.lock() = Some((now, error.to_string()));
    }

    fn snapshot(&self) -> ProxyMetrics {
        let calls = self.calls.load(Ordering::Relaxed);
        let total_latency_us = self.total_latency_us.load(Ordering::Relaxed);
        let last_failure = self.last_failure.lock().clone();
        ProxyMetrics {
            calls,
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            last_failure: last_failure.as_ref().map(|(at, _)| *at),
            last_error: last_failure.map(|(_, message)| message),
            average_latency_ms: if calls == 0 {
                0.0
            } else {
                total_latency_us as f64 / calls as f64 / 1000.0
            },
        }
    }
}

/// 插槽的远程调用客户端
pub struct PluginProxy<S: Slot> {
    channel: Arc<dyn PluginChannel>,
    runtime: tokio::runtime::Handle,
    call_timeout: Duration,
    plugin: HandshakeResponse,
    outcome: ValidationOutcome,
    metrics: MetricsCell,
    _slot: PhantomData<fn() -> S>,
}

impl<S: Slot> PluginProxy<S> {
    /// 握手并校验插件；校验失败时不创建客户端
    ///
    /// 阻塞当前线程直到握手完成
    pub fn connect(channel: Arc<dyn PluginChannel>, runtime: &RpcRuntime) -> Result<Self, BindError> {
        Self::connect_with(channel, runtime.handle(), runtime.call_timeout())
    }

    pub fn connect_with(
        channel: Arc<dyn PluginChannel>,
        runtime: tokio::runtime::Handle,
        call_timeout: Duration,
    ) -> Result<Self, BindError> {
        let endpoint = channel.endpoint();
        let handshake = HandshakeRequest {
            engine_name: crate::FRAMEWORK_NAME.to_string(),
            engine_version: crate::VERSION.to_string(),
            slot: S::ID,
            version_range: S::VERSION_RANGE.to_string(),
        };
        let handshake_failed = |source: RpcError| BindError::Handshake {
            endpoint: endpoint.clone(),
            source,
        };

        let payload = serde_json::to_value(&handshake)
            .map_err(|e| handshake_failed(RpcError::malformed(&e.to_string())))?;
        let request = RpcRequest::new(S::ID, methods::HANDSHAKE, payload);
        let response = exchange(&runtime, &channel, request, call_timeout).map_err(&handshake_failed)?;
        let payload = response_payload(response).map_err(&handshake_failed)?;
        let plugin: HandshakeResponse = serde_json::from_value(payload)
            .map_err(|e| handshake_failed(RpcError::malformed(&format!("invalid handshake response: {}", e))))?;

        let outcome = S::validator().validate(&plugin);
        if !outcome.is_valid() {
            let reason = outcome.reason().unwrap_or("rejected").to_string();
            error!(
                "Plugin '{}' v{} at {} rejected for slot '{}': {}",
                plugin.plugin_name, plugin.plugin_version, endpoint, S::ID, reason
            );
            return Err(BindError::Rejected {
                slot: S::ID,
                plugin: plugin.plugin_name,
                reason,
            });
        }

        info!(
            "Plugin '{}' v{} (slot version {}) accepted for slot '{}' at {}",
            plugin.plugin_name, plugin.plugin_version, plugin.slot_version, S::ID, endpoint
        );

        Ok(Self {
            channel,
            runtime,
            call_timeout,
            plugin,
            outcome,
            metrics: MetricsCell::default(),
            _slot: PhantomData,
        })
    }

    /// 执行一次远程调用
    pub fn call(&self, args: &S::Args) -> Result<S::Output, CallError> {
        let started = Instant::now();
        let result = self.call_inner(args);
        match &result {
            Ok(_) => {
                self.metrics.calls.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .total_latency_us
                    .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
                debug!("Slot '{}' served remotely in {:?}", S::ID, started.elapsed());
            }
            Err(e) => self.metrics.record_failure(e),
        }
        result
    }

    fn call_inner(&self, args: &S::Args) -> Result<S::Output, CallError> {
        let payload = encode_payload::<S::RequestConverter>(args)?;
        let request = RpcRequest::new(S::ID, methods::CALL, payload);
        let response = exchange(&self.runtime, &self.channel, request, self.call_timeout)?;
        let payload = response_payload(response)?;
        let output = decode_payload::<S::ResponseConverter>(payload)?;
        Ok(output)
    }

    /// 覆盖绑定时的调用超时
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// 插件声明的契约
    pub fn plugin(&self) -> &HandshakeResponse {
        &self.plugin
    }

    /// 绑定时缓存的校验结果
    pub fn validation(&self) -> &ValidationOutcome {
        &self.outcome
    }

    pub fn endpoint(&self) -> String {
        self.channel.endpoint()
    }

    pub fn metrics(&self) -> ProxyMetrics {
        self.metrics.snapshot()
    }
}

impl<S: Slot> std::fmt::Debug for PluginProxy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginProxy")
            .field("slot", &S::ID)
            .field("endpoint", &self.channel.endpoint())
            .field("plugin", &self.plugin.plugin_name)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// 在远程调用运行时上执行一次带超时的请求/响应交换，阻塞等待结果
fn exchange(
    runtime: &tokio::runtime::Handle,
    channel: &Arc<dyn PluginChannel>,
    request: RpcRequest,
    timeout: Duration,
) -> Result<RpcResponse, RpcError> {
    let expected = request.id;
    let channel = Arc::clone(channel);
    let response = run_blocking(runtime, async move {
        match tokio::time::timeout(timeout, channel.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    })??;

    if response.id != expected {
        return Err(RpcError::malformed(&format!(
            "response id {} does not match request id {}",
            response.id, expected
        )));
    }
    Ok(response)
}

/// 从响应信封中取出负载
fn response_payload(response: RpcResponse) -> Result<serde_json::Value, RpcError> {
    match response.status {
        ResponseStatus::Ok => response
            .payload
            .ok_or_else(|| RpcError::malformed("response without payload")),
        ResponseStatus::Error | ResponseStatus::Unsupported => Err(RpcError::remote(
            response.error.as_deref().unwrap_or("unspecified plugin error"),
        )),
    }
}
