//! 值转换层
//!
//! 原生值与线上消息之间的双向映射。转换器是无状态的零尺寸类型，
//! 每个插槽声明一个请求转换器与一个响应转换器。

use crate::error::ConversionError;
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 原生值 ⇄ 线上消息 的转换器
///
/// `from_wire(to_wire(v))` 在插槽的等价关系下必须与 `v` 一致。
/// 转换结果完全拥有自己的数据，不保留对引擎数据的引用。
pub trait Converter {
    type Native;
    type Wire: Serialize + DeserializeOwned + Send + 'static;

    /// 用于错误信息的类型名称
    const WHAT: &'static str;

    fn to_wire(native: &Self::Native) -> Result<Self::Wire, ConversionError>;

    fn from_wire(wire: Self::Wire) -> Result<Self::Native, ConversionError>;
}

/// 原生值编码为 JSON 负载
pub fn encode_payload<C: Converter>(native: &C::Native) -> Result<serde_json::Value, ConversionError> {
    let wire = C::to_wire(native)?;
    serde_json::to_value(wire).map_err(|e| ConversionError::encode(C::WHAT, e))
}

/// JSON 负载解码为原生值
pub fn decode_payload<C: Converter>(payload: serde_json::Value) -> Result<C::Native, ConversionError> {
    let wire: C::Wire = serde_json::from_value(payload).map_err(|e| ConversionError::decode(C::WHAT, e))?;
    C::from_wire(wire)
}

// === 几何 ===

/// 路径展开为扁平坐标序列
pub fn path_to_wire(points: &[Point2]) -> Vec<i64> {
    points.iter().flat_map(|p| [p.x, p.y]).collect()
}

/// 扁平坐标序列还原为点序列，长度必须为偶数
pub fn path_from_wire(what: &str, coords: &[i64]) -> Result<Vec<Point2>, ConversionError> {
    if coords.len() % 2 != 0 {
        return Err(ConversionError::decode(
            what,
            format!("odd coordinate count {}", coords.len()),
        ));
    }
    Ok(coords.chunks_exact(2).map(|xy| Point2::new(xy[0], xy[1])).collect())
}

pub fn polygons_to_wire(polygons: &Polygons) -> PolygonsMessage {
    PolygonsMessage {
        paths: polygons.paths.iter().map(|p| path_to_wire(&p.points)).collect(),
    }
}

pub fn polygons_from_wire(message: &PolygonsMessage) -> Result<Polygons, ConversionError> {
    message
        .paths
        .iter()
        .map(|coords| path_from_wire("polygon", coords).map(Polygon::new))
        .collect::<Result<Vec<_>, _>>()
        .map(Polygons::new)
}

/// 原生的容差使用有符号坐标，线上为无符号，负值无法表示
fn tolerance_to_wire(name: &str, value: Coord) -> Result<u64, ConversionError> {
    u64::try_from(value).map_err(|_| ConversionError::encode(name, format!("negative tolerance {}", value)))
}

fn tolerance_from_wire(name: &str, value: u64) -> Result<Coord, ConversionError> {
    Coord::try_from(value).map_err(|_| ConversionError::decode(name, format!("tolerance {} out of range", value)))
}

// === 简化插槽 ===

/// 简化插槽的原生参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplifyArgs {
    pub polygons: Polygons,
    pub max_resolution: Coord,
    pub max_deviation: Coord,
    pub max_area_deviation: Coord,
}

pub struct SimplifyRequestConverter;

impl Converter for SimplifyRequestConverter {
    type Native = SimplifyArgs;
    type Wire = SimplifyRequest;
    const WHAT: &'static str = "simplify request";

    fn to_wire(native: &SimplifyArgs) -> Result<SimplifyRequest, ConversionError> {
        Ok(SimplifyRequest {
            polygons: polygons_to_wire(&native.polygons),
            max_resolution: tolerance_to_wire("max_resolution", native.max_resolution)?,
            max_deviation: tolerance_to_wire("max_deviation", native.max_deviation)?,
            max_area_deviation: tolerance_to_wire("max_area_deviation", native.max_area_deviation)?,
        })
    }

    fn from_wire(wire: SimplifyRequest) -> Result<SimplifyArgs, ConversionError> {
        Ok(SimplifyArgs {
            polygons: polygons_from_wire(&wire.polygons)?,
            max_resolution: tolerance_from_wire("max_resolution", wire.max_resolution)?,
            max_deviation: tolerance_from_wire("max_deviation", wire.max_deviation)?,
            max_area_deviation: tolerance_from_wire("max_area_deviation", wire.max_area_deviation)?,
        })
    }
}

pub struct SimplifyResponseConverter;

impl Converter for SimplifyResponseConverter {
    type Native = Polygons;
    type Wire = SimplifyResponse;
    const WHAT: &'static str = "simplify response";

    fn to_wire(native: &Polygons) -> Result<SimplifyResponse, ConversionError> {
        Ok(SimplifyResponse {
            polygons: polygons_to_wire(native),
        })
    }

    fn from_wire(wire: SimplifyResponse) -> Result<Polygons, ConversionError> {
        polygons_from_wire(&wire.polygons)
    }
}

// === 后处理插槽 ===

/// 后处理插槽的原生参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostprocessArgs {
    pub gcode: String,
}

pub struct PostprocessRequestConverter;

impl Converter for PostprocessRequestConverter {
    type Native = PostprocessArgs;
    type Wire = PostprocessRequest;
    const WHAT: &'static str = "postprocess request";

    fn to_wire(native: &PostprocessArgs) -> Result<PostprocessRequest, ConversionError> {
        Ok(PostprocessRequest {
            gcode: native.gcode.clone(),
        })
    }

    fn from_wire(wire: PostprocessRequest) -> Result<PostprocessArgs, ConversionError> {
        Ok(PostprocessArgs { gcode: wire.gcode })
    }
}

pub struct PostprocessResponseConverter;

impl Converter for PostprocessResponseConverter {
    type Native = String;
    type Wire = PostprocessResponse;
    const WHAT: &'static str = "postprocess response";

    fn to_wire(native: &String) -> Result<PostprocessResponse, ConversionError> {
        Ok(PostprocessResponse { gcode: native.clone() })
    }

    fn from_wire(wire: PostprocessResponse) -> Result<String, ConversionError> {
        Ok(wire.gcode)
    }
}

// === 填充生成插槽 ===

/// 填充生成插槽的原生参数
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfillArgs {
    pub outline: Polygons,
    pub pattern: String,
    pub settings: std::collections::BTreeMap<String, String>,
}

/// 填充生成结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfillResult {
    pub lines: Vec<Polyline>,
    pub polygons: Polygons,
}

pub struct InfillRequestConverter;

impl Converter for InfillRequestConverter {
    type Native = InfillArgs;
    type Wire = InfillRequest;
    const WHAT: &'static str = "infill request";

    fn to_wire(native: &InfillArgs) -> Result<InfillRequest, ConversionError> {
        if native.pattern.trim().is_empty() {
            return Err(ConversionError::encode(Self::WHAT, "infill pattern must not be empty"));
        }
        Ok(InfillRequest {
            outline: polygons_to_wire(&native.outline),
            pattern: native.pattern.clone(),
            settings: native.settings.clone(),
        })
    }

    fn from_wire(wire: InfillRequest) -> Result<InfillArgs, ConversionError> {
        Ok(InfillArgs {
            outline: polygons_from_wire(&wire.outline)?,
            pattern: wire.pattern,
            settings: wire.settings,
        })
    }
}

pub struct InfillResponseConverter;

impl Converter for InfillResponseConverter {
    type Native = InfillResult;
    type Wire = InfillResponse;
    const WHAT: &'static str = "infill response";

    fn to_wire(native: &InfillResult) -> Result<InfillResponse, ConversionError> {
        Ok(InfillResponse {
            lines: native.lines.iter().map(|l| path_to_wire(&l.points)).collect(),
            polygons: polygons_to_wire(&native.polygons),
        })
    }

    fn from_wire(wire: InfillResponse) -> Result<InfillResult, ConversionError> {
        let lines = wire
            .lines
            .iter()
            .map(|coords| path_from_wire("polyline", coords).map(Polyline::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(InfillResult {
            lines,
            polygons: polygons_from_wire(&wire.polygons)?,
        })
    }
}
