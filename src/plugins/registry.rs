//! 插槽注册表
//!
//! 编译期固定的插槽集合，每个插槽一个前端。提供按 [`SlotId`] 的运行时绑定入口，
//! 以及按配置批量连接插件。

use super::slot_proxy::{SlotProxy, SlotStats};
use super::slots::{InfillSlot, PostprocessSlot, SimplifySlot, Slot};
use super::validator::SlotValidator;
use crate::config::EngineConfig;
use crate::error::BindError;
use crate::transport::{PluginChannel, RpcRuntime, TcpChannel};
use crate::types::{HandshakeResponse, SlotId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// 插槽描述
#[derive(Debug, Clone, Serialize)]
pub struct SlotDescriptor {
    pub slot: SlotId,
    /// 接受的插槽协议版本范围
    pub version_range: String,
    /// 必需的能力标志
    pub required_capabilities: Vec<String>,
    /// 当前绑定的插件
    pub plugin: Option<HandshakeResponse>,
    pub remote_calls: u64,
    pub fallback_calls: u64,
    pub default_calls: u64,
    pub failures: u64,
}

/// 单个配置绑定的结果
#[derive(Debug)]
pub struct BindReport {
    pub slot: SlotId,
    pub address: String,
    /// 成功时为插件名称
    pub outcome: Result<String, BindError>,
}

impl BindReport {
    pub fn is_bound(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl std::fmt::Display for BindReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            Ok(plugin) => write!(f, "{} -> {} (plugin '{}')", self.slot, self.address, plugin),
            Err(e) => write!(f, "{} -> {} failed: {}", self.slot, self.address, e),
        }
    }
}

/// 插槽注册表
#[derive(Debug, Default)]
pub struct SlotRegistry {
    simplify: SlotProxy<SimplifySlot>,
    postprocess: SlotProxy<PostprocessSlot>,
    infill: SlotProxy<InfillSlot>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simplify(&self) -> &SlotProxy<SimplifySlot> {
        &self.simplify
    }

    pub fn postprocess(&self) -> &SlotProxy<PostprocessSlot> {
        &self.postprocess
    }

    pub fn infill(&self) -> &SlotProxy<InfillSlot> {
        &self.infill
    }

    /// 绑定插槽，失败时原有绑定保持不变
    pub fn bind(&self, slot: SlotId, channel: Arc<dyn PluginChannel>, runtime: &RpcRuntime) -> Result<(), BindError> {
        match slot {
            SlotId::Simplify => self.simplify.bind(channel, runtime),
            SlotId::Postprocess => self.postprocess.bind(channel, runtime),
            SlotId::InfillGenerate => self.infill.bind(channel, runtime),
        }
    }

    /// 连接TCP地址并绑定插槽
    pub fn bind_address(&self, slot: SlotId, address: &str, runtime: &RpcRuntime) -> Result<(), BindError> {
        let channel = connect_tcp(address, runtime)?;
        self.bind(slot, channel, runtime)
    }

    pub fn unbind(&self, slot: SlotId) -> bool {
        match slot {
            SlotId::Simplify => self.simplify.unbind(),
            SlotId::Postprocess => self.postprocess.unbind(),
            SlotId::InfillGenerate => self.infill.unbind(),
        }
    }

    /// 解除全部绑定
    pub fn unbind_all(&self) {
        for slot in SlotId::ALL {
            self.unbind(slot);
        }
    }

    pub fn is_bound(&self, slot: SlotId) -> bool {
        match slot {
            SlotId::Simplify => self.simplify.is_bound(),
            SlotId::Postprocess => self.postprocess.is_bound(),
            SlotId::InfillGenerate => self.infill.is_bound(),
        }
    }

    pub fn bound_slots(&self) -> Vec<SlotId> {
        SlotId::ALL.into_iter().filter(|slot| self.is_bound(*slot)).collect()
    }

    pub fn describe(&self) -> Vec<SlotDescriptor> {
        vec![
            describe_slot(&self.simplify),
            describe_slot(&self.postprocess),
            describe_slot(&self.infill),
        ]
    }

    /// 按配置连接所有启用的绑定
    ///
    /// 同一地址只建立一条连接，由该地址上的所有插槽共享。
    /// 每个绑定单独报告结果，一个失败不影响其他绑定。
    pub fn connect_from_config(&self, config: &EngineConfig, runtime: &RpcRuntime) -> Vec<BindReport> {
        let mut channels: HashMap<String, Result<Arc<dyn PluginChannel>, BindError>> = HashMap::new();
        let mut reports = Vec::new();

        for binding in config.plugins.iter().filter(|b| b.enabled) {
            let channel = channels
                .entry(binding.address.clone())
                .or_insert_with(|| connect_tcp(&binding.address, runtime))
                .clone();

            let outcome = channel
                .and_then(|channel| self.bind(binding.slot, channel, runtime))
                .map(|_| self.plugin_name(binding.slot).unwrap_or_default());

            match &outcome {
                Ok(plugin) => info!("Slot '{}' bound to '{}' at {}", binding.slot, plugin, binding.address),
                Err(e) => warn!("Slot '{}' keeps its current behavior: {}", binding.slot, e),
            }

            reports.push(BindReport {
                slot: binding.slot,
                address: binding.address.clone(),
                outcome,
            });
        }

        reports
    }

    fn plugin_name(&self, slot: SlotId) -> Option<String> {
        let plugin = match slot {
            SlotId::Simplify => self.simplify.plugin(),
            SlotId::Postprocess => self.postprocess.plugin(),
            SlotId::InfillGenerate => self.infill.plugin(),
        };
        plugin.map(|p| p.plugin_name)
    }
}

/// 在远程调用运行时上建立TCP通道
pub fn connect_tcp(address: &str, runtime: &RpcRuntime) -> Result<Arc<dyn PluginChannel>, BindError> {
    let owned = address.to_string();
    let timeout = runtime.connect_timeout();
    let channel = runtime
        .run(async move { TcpChannel::connect(&owned, timeout).await })
        .map_err(|e| BindError::Unreachable {
            endpoint: address.to_string(),
            message: e.to_string(),
        })??;
    Ok(Arc::new(channel))
}

fn describe_slot<S: Slot<Validator = SlotValidator>>(proxy: &SlotProxy<S>) -> SlotDescriptor {
    let validator = S::validator();
    let SlotStats {
        remote_calls,
        fallback_calls,
        default_calls,
        failures,
    } = proxy.stats();
    SlotDescriptor {
        slot: S::ID,
        version_range: validator.version_range().to_string(),
        required_capabilities: validator.required_capabilities().to_vec(),
        plugin: proxy.plugin(),
        remote_calls,
        fallback_calls,
        default_calls,
        failures,
    }
}
