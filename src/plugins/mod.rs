//! 插槽绑定层
//!
//! 把引擎的命名计算步骤委托给进程外插件，并在插件缺失、不兼容或失联时
//! 回退到内建默认行为。

pub mod converters;
pub mod proxy;
pub mod reference;
pub mod registry;
pub mod slot_proxy;
pub mod slots;
pub mod validator;

// 重新导出核心组件
pub use converters::{Converter, InfillArgs, InfillResult, PostprocessArgs, SimplifyArgs};
pub use proxy::{PluginProxy, ProxyMetrics};
pub use reference::ReferencePlugin;
pub use registry::{connect_tcp, BindReport, SlotDescriptor, SlotRegistry};
pub use slot_proxy::{SlotProxy, SlotStats};
pub use slots::{DefaultFn, InfillSlot, PostprocessSlot, SimplifySlot, Slot};
pub use validator::{CapabilityValidator, SlotValidator, ValidationOutcome};
