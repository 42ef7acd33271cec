//! 插槽前端
//!
//! 引擎调用插槽的统一入口。最多持有一个远程调用客户端，
//! 没有绑定时执行静态绑定的默认行为。

use super::proxy::{PluginProxy, ProxyMetrics};
use super::slots::{DefaultFn, Slot};
use crate::error::{BindError, CallError, ConversionError};
use crate::transport::{PluginChannel, RpcRuntime};
use crate::types::{HandshakeResponse, SlotId};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 插槽前端统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// 由插件完成的调用
    pub remote_calls: u64,
    /// 插件失败后降级到默认行为的调用
    pub fallback_calls: u64,
    /// 未绑定时直接执行默认行为的调用
    pub default_calls: u64,
    /// 转换失败而向上传播的调用
    pub failures: u64,
}

#[derive(Default)]
struct SlotCounters {
    remote_calls: AtomicU64,
    fallback_calls: AtomicU64,
    default_calls: AtomicU64,
    failures: AtomicU64,
}

/// 插槽前端
///
/// 绑定以原子替换的共享句柄保存：进行中的调用继续使用旧绑定，
/// 替换之后开始的调用使用新绑定。
pub struct SlotProxy<S: Slot> {
    plugin: RwLock<Option<Arc<PluginProxy<S>>>>,
    default: DefaultFn<S>,
    counters: SlotCounters,
}

impl<S: Slot> SlotProxy<S> {
    pub const SLOT_ID: SlotId = S::ID;

    /// 使用插槽自带的默认行为
    pub fn new() -> Self {
        Self::with_default(S::default_behavior)
    }

    /// 使用引擎提供的默认行为
    pub fn with_default(default: DefaultFn<S>) -> Self {
        Self {
            plugin: RwLock::new(None),
            default,
            counters: SlotCounters::default(),
        }
    }

    /// 绑定插件通道
    ///
    /// 握手与校验在锁外完成，失败时保留原有绑定
    pub fn bind(&self, channel: Arc<dyn PluginChannel>, runtime: &RpcRuntime) -> Result<(), BindError> {
        let proxy = PluginProxy::<S>::connect(channel, runtime)?;
        self.install(proxy);
        Ok(())
    }

    /// 安装已经通过校验的客户端
    pub fn install(&self, proxy: PluginProxy<S>) {
        let endpoint = proxy.endpoint();
        let previous = self.plugin.write().replace(Arc::new(proxy));
        match previous {
            Some(old) => info!("Slot '{}' rebound from {} to {}", S::ID, old.endpoint(), endpoint),
            None => info!("Slot '{}' bound to {}", S::ID, endpoint),
        }
    }

    /// 解除绑定，立即恢复默认行为
    pub fn unbind(&self) -> bool {
        match self.plugin.write().take() {
            Some(old) => {
                info!("Slot '{}' unbound from {}", S::ID, old.endpoint());
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.plugin.read().is_some()
    }

    /// 当前绑定插件声明的契约
    pub fn plugin(&self) -> Option<HandshakeResponse> {
        self.current().map(|proxy| proxy.plugin().clone())
    }

    /// 当前绑定的客户端统计
    pub fn plugin_metrics(&self) -> Option<ProxyMetrics> {
        self.current().map(|proxy| proxy.metrics())
    }

    fn current(&self) -> Option<Arc<PluginProxy<S>>> {
        self.plugin.read().clone()
    }

    /// 调用插槽
    ///
    /// 传输失败时本次调用降级为默认行为；转换失败向上传播
    pub fn invoke(&self, args: S::Args) -> Result<S::Output, ConversionError> {
        let plugin = match self.current() {
            Some(plugin) => plugin,
            None => {
                self.counters.default_calls.fetch_add(1, Ordering::Relaxed);
                return Ok((self.default)(args));
            }
        };

        match plugin.call(&args) {
            Ok(output) => {
                self.counters.remote_calls.fetch_add(1, Ordering::Relaxed);
                Ok(output)
            }
            Err(CallError::Rpc(e)) => {
                warn!(
                    "Slot '{}' plugin at {} failed, using default behavior: {}",
                    S::ID,
                    plugin.endpoint(),
                    e
                );
                self.counters.fallback_calls.fetch_add(1, Ordering::Relaxed);
                Ok((self.default)(args))
            }
            Err(CallError::Conversion(e)) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// 在 rayon 线程池上并行调用一批参数，结果保持输入顺序
    pub fn invoke_many(&self, batch: Vec<S::Args>) -> Vec<Result<S::Output, ConversionError>> {
        debug!("Slot '{}' invoked for a batch of {}", S::ID, batch.len());
        batch.into_par_iter().map(|args| self.invoke(args)).collect()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            remote_calls: self.counters.remote_calls.load(Ordering::Relaxed),
            fallback_calls: self.counters.fallback_calls.load(Ordering::Relaxed),
            default_calls: self.counters.default_calls.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl<S: Slot> Default for SlotProxy<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Slot> std::fmt::Debug for SlotProxy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotProxy")
            .field("slot", &S::ID)
            .field("plugin", &self.current())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RpcSettings;
    use crate::plugins::converters::{InfillArgs, PostprocessArgs};
    use crate::plugins::reference::ReferencePlugin;
    use crate::plugins::slots::{InfillSlot, PostprocessSlot};
    use crate::transport::LocalChannel;
    use crate::types::{Point2, Polygons};
    use std::time::Duration;

    fn runtime() -> RpcRuntime {
        RpcRuntime::new(&RpcSettings {
            connect_timeout_ms: 500,
            call_timeout_ms: 500,
            worker_threads: 2,
        })
        .unwrap()
    }

    fn gcode(text: &str) -> PostprocessArgs {
        PostprocessArgs { gcode: text.to_string() }
    }

    fn local(name: &str) -> Arc<LocalChannel> {
        Arc::new(LocalChannel::new(name, Arc::new(ReferencePlugin::new(name))))
    }

    #[test]
    fn test_unbound_slot_uses_default() {
        let slot = SlotProxy::<PostprocessSlot>::new();
        assert!(!slot.is_bound());
        assert_eq!(slot.invoke(gcode("G28")).unwrap(), "G28");
        assert_eq!(slot.stats().default_calls, 1);
        assert!(slot.plugin().is_none());
    }

    #[test]
    fn test_engine_supplied_default() {
        fn shout(args: PostprocessArgs) -> String {
            args.gcode.to_uppercase()
        }
        let slot = SlotProxy::<PostprocessSlot>::with_default(shout);
        assert_eq!(slot.invoke(gcode("g1 x5")).unwrap(), "G1 X5");
    }

    #[test]
    fn test_bind_invoke_unbind() {
        let runtime = runtime();
        let slot = SlotProxy::<PostprocessSlot>::new();

        slot.bind(local("alpha"), &runtime).unwrap();
        assert!(slot.is_bound());
        assert_eq!(slot.plugin().unwrap().plugin_name, "alpha");
        assert_eq!(slot.invoke(gcode("G28")).unwrap(), ";POSTPROCESSED BY alpha\nG28");

        assert!(slot.unbind());
        assert!(!slot.unbind());
        assert_eq!(slot.invoke(gcode("G28")).unwrap(), "G28");

        let stats = slot.stats();
        assert_eq!(stats.remote_calls, 1);
        assert_eq!(stats.default_calls, 1);
    }

    #[test]
    fn test_bound_slot_invoked_from_engine_tokio_tasks() {
        let runtime = runtime();
        let engine = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let slot = Arc::new(SlotProxy::<PostprocessSlot>::new());

        engine.block_on(async { slot.bind(local("alpha"), &runtime) }).unwrap();

        let output = {
            let slot = Arc::clone(&slot);
            engine.block_on(engine.spawn(async move { slot.invoke(gcode("G1")) }))
        };
        assert_eq!(output.unwrap().unwrap(), ";POSTPROCESSED BY alpha\nG1");

        let current_thread = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let output = current_thread.block_on(async { slot.invoke(gcode("G2")) });
        assert_eq!(output.unwrap(), ";POSTPROCESSED BY alpha\nG2");
        assert_eq!(slot.stats().remote_calls, 2);
    }

    #[test]
    fn test_validation_runs_once_per_binding() {
        let runtime = runtime();
        let slot = SlotProxy::<PostprocessSlot>::new();
        let channel = local("alpha");

        slot.bind(channel.clone(), &runtime).unwrap();
        for i in 0..5 {
            slot.invoke(gcode(&format!("G1 X{}", i))).unwrap();
        }
        assert_eq!(channel.handshakes(), 1);
        assert_eq!(channel.served(), 6);

        slot.bind(channel.clone(), &runtime).unwrap();
        slot.invoke(gcode("G1")).unwrap();
        assert_eq!(channel.handshakes(), 2);
        assert_eq!(channel.served(), 8);
    }

    #[test]
    fn test_rejected_bind_keeps_previous_binding() {
        let runtime = runtime();
        let slot = SlotProxy::<PostprocessSlot>::new();

        let incompatible = Arc::new(LocalChannel::new(
            "future",
            Arc::new(ReferencePlugin::new("future").with_slot_version("0.2.0")),
        ));
        let err = slot.bind(incompatible.clone(), &runtime).unwrap_err();
        assert!(matches!(err, BindError::Rejected { .. }));
        assert!(!slot.is_bound());
        assert_eq!(slot.invoke(gcode("G1")).unwrap(), "G1");

        slot.bind(local("alpha"), &runtime).unwrap();
        assert!(slot.bind(incompatible, &runtime).is_err());
        assert_eq!(slot.plugin().unwrap().plugin_name, "alpha");
        assert_eq!(slot.invoke(gcode("G1")).unwrap(), ";POSTPROCESSED BY alpha\nG1");
    }

    #[test]
    fn test_transport_failure_degrades_single_call() {
        let runtime = runtime();
        let slot = SlotProxy::<PostprocessSlot>::new();
        let channel = local("alpha");
        slot.bind(channel.clone(), &runtime).unwrap();

        channel.shutdown();
        assert_eq!(slot.invoke(gcode("G1")).unwrap(), "G1");
        assert!(slot.is_bound());

        channel.restart();
        assert_eq!(slot.invoke(gcode("G1")).unwrap(), ";POSTPROCESSED BY alpha\nG1");

        let stats = slot.stats();
        assert_eq!(stats.fallback_calls, 1);
        assert_eq!(stats.remote_calls, 1);
        assert_eq!(slot.plugin_metrics().unwrap().transport_failures, 1);
    }

    #[test]
    fn test_conversion_error_is_propagated() {
        let runtime = runtime();
        let slot = SlotProxy::<InfillSlot>::new();
        slot.bind(local("alpha"), &runtime).unwrap();

        let args = InfillArgs {
            outline: Polygons::rectangle(Point2::new(0, 0), Point2::new(10, 10)),
            pattern: String::new(),
            settings: Default::default(),
        };
        assert!(matches!(slot.invoke(args), Err(ConversionError::Encode { .. })));
        assert_eq!(slot.stats().failures, 1);
        assert_eq!(slot.stats().fallback_calls, 0);
    }

    #[test]
    fn test_invoke_many_preserves_order() {
        let runtime = runtime();
        let slot = SlotProxy::<PostprocessSlot>::new();
        slot.bind(local("alpha"), &runtime).unwrap();

        let batch: Vec<_> = (0..32).map(|i| gcode(&format!("G1 X{}", i))).collect();
        let results = slot.invoke_many(batch);
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), format!(";POSTPROCESSED BY alpha\nG1 X{}", i));
        }
        assert_eq!(slot.stats().remote_calls, 32);
    }

    #[test]
    fn test_in_flight_call_finishes_on_old_binding() {
        let runtime = runtime();
        let slot = Arc::new(SlotProxy::<PostprocessSlot>::new());
        let slow = Arc::new(
            LocalChannel::new("slow", Arc::new(ReferencePlugin::new("slow"))).with_latency(Duration::from_millis(100)),
        );
        slot.bind(slow, &runtime).unwrap();

        let in_flight = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || slot.invoke(gcode("G1")))
        };
        std::thread::sleep(Duration::from_millis(30));
        slot.bind(local("fast"), &runtime).unwrap();

        assert_eq!(in_flight.join().unwrap().unwrap(), ";POSTPROCESSED BY slow\nG1");
        assert_eq!(slot.invoke(gcode("G1")).unwrap(), ";POSTPROCESSED BY fast\nG1");
    }

    #[test]
    fn test_concurrent_invokes_never_observe_torn_binding() {
        let runtime = runtime();
        let slot = Arc::new(SlotProxy::<PostprocessSlot>::new());
        let alpha = local("alpha");
        let beta = local("beta");

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let slot = Arc::clone(&slot);
                scope.spawn(move || {
                    for i in 0..50 {
                        let input = format!("G1 X{} ; worker {}", i, worker);
                        let output = slot.invoke(gcode(&input)).unwrap();
                        let allowed = [
                            input.clone(),
                            format!(";POSTPROCESSED BY alpha\n{}", input),
                            format!(";POSTPROCESSED BY beta\n{}", input),
                        ];
                        assert!(allowed.contains(&output), "unexpected output {:?}", output);
                    }
                });
            }

            for round in 0..10 {
                let channel = if round % 2 == 0 { Arc::clone(&alpha) } else { Arc::clone(&beta) };
                slot.bind(channel, &runtime).unwrap();
                std::thread::sleep(Duration::from_millis(2));
                if round % 3 == 0 {
                    slot.unbind();
                }
            }
        });

        let stats = slot.stats();
        assert_eq!(stats.remote_calls + stats.default_calls + stats.fallback_calls, 200);
        assert_eq!(stats.fallback_calls, 0);
    }
}
