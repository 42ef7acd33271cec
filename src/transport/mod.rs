//! 插件通信通道
//!
//! 面向连接、可多路复用的请求/响应通道，以及驱动阻塞调用的异步运行时

pub mod codec;
pub mod local;
pub mod server;
pub mod tcp;

pub use local::LocalChannel;
pub use server::{dispatch, serve_slot, PluginServer, PluginService, ServerHandle};
pub use tcp::TcpChannel;

use crate::config::RpcSettings;
use crate::error::RpcError;
use crate::types::{RpcRequest, RpcResponse};
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// 通往单个插件进程的通道
///
/// 一个通道可以同时服务多个插槽，响应按请求ID关联
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PluginChannel: Send + Sync {
    /// 发送请求并等待对应的响应
    async fn call(&self, request: RpcRequest) -> std::result::Result<RpcResponse, RpcError>;

    /// 对端地址描述
    fn endpoint(&self) -> String;
}

/// 在 `handle` 所属运行时上执行任务，并阻塞当前线程等待结果
///
/// 可以从任意线程调用，包括运行在其他 tokio 运行时中的引擎线程。
/// 只有当前线程恰好是该运行时唯一的工作线程时才会死锁。
pub fn run_blocking<F>(handle: &tokio::runtime::Handle, future: F) -> std::result::Result<F::Output, RpcError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let task = handle.spawn(future);
    futures::executor::block_on(task).map_err(|e| RpcError::closed(&format!("rpc task did not complete: {}", e)))
}

/// 远程调用运行时
///
/// 持有独立的多线程 tokio 运行时，引擎工作线程通过 [`RpcRuntime::run`] 阻塞等待远程调用。
pub struct RpcRuntime {
    runtime: tokio::runtime::Runtime,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl RpcRuntime {
    pub fn new(settings: &RpcSettings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.worker_threads.max(1))
            .thread_name("slotwire-rpc")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
        })
    }

    /// 运行时句柄
    pub fn handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }

    /// 在当前线程上阻塞执行异步任务，不能在任何 tokio 运行时内部调用
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// 在运行时的工作线程上执行任务并等待结果，可以从任意线程调用
    pub fn run<F>(&self, future: F) -> std::result::Result<F::Output, RpcError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        run_blocking(self.runtime.handle(), future)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// 覆盖调用超时
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for RpcRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRuntime")
            .field("connect_timeout", &self.connect_timeout)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
