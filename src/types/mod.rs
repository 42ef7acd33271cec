//! slotwire 核心数据类型模块
//!
//! 引擎侧的原生几何类型、插槽标识以及跨进程传输的线上消息

pub mod geometry;
pub mod wire;

// 重新导出所有公共类型
pub use geometry::*;
pub use wire::*;

use crate::error::BindError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// 纳秒时间戳
pub type TimestampNs = i64;

/// 插槽标识
///
/// 编译期固定的扩展点集合，运行时不会创建或销毁
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotId {
    /// 多边形简化
    Simplify,
    /// G-code 后处理
    Postprocess,
    /// 填充生成
    InfillGenerate,
}

impl SlotId {
    /// 全部插槽，按注册顺序排列
    pub const ALL: [SlotId; 3] = [SlotId::Simplify, SlotId::Postprocess, SlotId::InfillGenerate];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotId::Simplify => "simplify",
            SlotId::Postprocess => "postprocess",
            SlotId::InfillGenerate => "infill_generate",
        }
    }
}

impl Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotId {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SlotId::ALL
            .iter()
            .copied()
            .find(|slot| slot.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BindError::UnknownSlot { name: s.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_names() {
        assert_eq!(SlotId::Simplify.to_string(), "simplify");
        assert_eq!(SlotId::InfillGenerate.as_str(), "infill_generate");
        assert_eq!(SlotId::ALL.len(), 3);
    }

    #[test]
    fn test_slot_id_parsing() {
        assert_eq!("postprocess".parse::<SlotId>().unwrap(), SlotId::Postprocess);
        assert_eq!(" Infill_Generate ".parse::<SlotId>().unwrap(), SlotId::InfillGenerate);

        let err = "support".parse::<SlotId>().unwrap_err();
        assert_eq!(err, BindError::UnknownSlot { name: "support".to_string() });
    }

    #[test]
    fn test_slot_id_serde_matches_display() {
        for slot in SlotId::ALL {
            let json = serde_json::to_string(&slot).unwrap();
            assert_eq!(json, format!("\"{}\"", slot));
        }
    }
}
