//! 插槽定义
//!
//! 每个插槽是一个实现 [`Slot`] 的零尺寸类型，在编译期绑定四种角色：
//! 原生参数/结果、线上请求/响应转换器、能力校验器与默认行为。

use super::converters::*;
use super::validator::{CapabilityValidator, SlotValidator};
use crate::types::{Polygon, Polygons, SlotId};

/// 插槽特征
pub trait Slot: Send + Sync + 'static {
    /// 插槽标识
    const ID: SlotId;

    /// 接受的插槽协议版本范围
    const VERSION_RANGE: &'static str;

    type Args: Send;
    type Output: Send;

    type RequestConverter: Converter<Native = Self::Args>;
    type ResponseConverter: Converter<Native = Self::Output>;

    type Validator: CapabilityValidator;

    fn validator() -> Self::Validator;

    /// 无插件时的内建实现
    fn default_behavior(args: Self::Args) -> Self::Output;
}

/// 静态绑定的默认行为
pub type DefaultFn<S> = fn(<S as Slot>::Args) -> <S as Slot>::Output;

/// 多边形简化插槽
pub struct SimplifySlot;

impl Slot for SimplifySlot {
    const ID: SlotId = SlotId::Simplify;
    const VERSION_RANGE: &'static str = ">=0.1.0, <0.2.0";

    type Args = SimplifyArgs;
    type Output = Polygons;
    type RequestConverter = SimplifyRequestConverter;
    type ResponseConverter = SimplifyResponseConverter;
    type Validator = SlotValidator;

    fn validator() -> SlotValidator {
        SlotValidator::new(Self::ID, Self::VERSION_RANGE)
    }

    /// 去掉连续重复顶点，丢弃不足三个顶点的多边形
    fn default_behavior(args: SimplifyArgs) -> Polygons {
        args.polygons
            .paths
            .into_iter()
            .filter_map(|polygon| {
                let mut points = polygon.points;
                points.dedup();
                if points.len() > 1 && points.first() == points.last() {
                    points.pop();
                }
                (points.len() >= 3).then(|| Polygon::new(points))
            })
            .collect::<Vec<_>>()
            .into()
    }
}

/// G-code 后处理插槽
pub struct PostprocessSlot;

impl Slot for PostprocessSlot {
    const ID: SlotId = SlotId::Postprocess;
    const VERSION_RANGE: &'static str = ">=0.1.0, <0.2.0";

    type Args = PostprocessArgs;
    type Output = String;
    type RequestConverter = PostprocessRequestConverter;
    type ResponseConverter = PostprocessResponseConverter;
    type Validator = SlotValidator;

    fn validator() -> SlotValidator {
        SlotValidator::new(Self::ID, Self::VERSION_RANGE)
    }

    fn default_behavior(args: PostprocessArgs) -> String {
        args.gcode
    }
}

/// 填充生成插槽
pub struct InfillSlot;

impl InfillSlot {
    /// 填充插件必须声明的能力
    pub const PATTERN_CAPABILITY: &'static str = "infill.pattern";
}

impl Slot for InfillSlot {
    const ID: SlotId = SlotId::InfillGenerate;
    const VERSION_RANGE: &'static str = ">=0.1.0, <0.2.0";

    type Args = InfillArgs;
    type Output = InfillResult;
    type RequestConverter = InfillRequestConverter;
    type ResponseConverter = InfillResponseConverter;
    type Validator = SlotValidator;

    fn validator() -> SlotValidator {
        SlotValidator::new(Self::ID, Self::VERSION_RANGE).require(Self::PATTERN_CAPABILITY)
    }

    /// 不生成线段，区域原样作为填充多边形返回
    fn default_behavior(args: InfillArgs) -> InfillResult {
        InfillResult {
            lines: Vec::new(),
            polygons: args.outline,
        }
    }
}
