//! 参考插件
//!
//! 同时服务全部插槽的插件实现，供 `slotwire serve` 与测试使用。
//! 各插槽的行为刻意与内建默认行为不同，便于区分结果来源。

use super::converters::{InfillArgs, InfillResult, PostprocessArgs, SimplifyArgs};
use super::slots::{InfillSlot, PostprocessSlot, SimplifySlot, Slot};
use crate::transport::{serve_slot, PluginService};
use crate::types::*;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// 默认扫描线间距（微米）
const DEFAULT_LINE_DISTANCE: Coord = 1000;

#[derive(Debug, Clone)]
pub struct ReferencePlugin {
    name: String,
    version: String,
    slot_version: String,
    slots: Vec<SlotId>,
    capabilities: Vec<String>,
}

impl ReferencePlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: crate::VERSION.to_string(),
            slot_version: "0.1.0".to_string(),
            slots: SlotId::ALL.to_vec(),
            capabilities: vec![InfillSlot::PATTERN_CAPABILITY.to_string()],
        }
    }

    /// 声明其他插槽协议版本
    pub fn with_slot_version(mut self, slot_version: &str) -> Self {
        self.slot_version = slot_version.to_string();
        self
    }

    /// 只服务指定插槽
    pub fn with_slots(mut self, slots: &[SlotId]) -> Self {
        self.slots = slots.to_vec();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 在默认去重基础上再去掉共线顶点
    pub fn simplify(&self, args: SimplifyArgs) -> Polygons {
        let deduplicated = SimplifySlot::default_behavior(args);
        deduplicated
            .paths
            .into_iter()
            .filter_map(|polygon| {
                let n = polygon.points.len();
                let points: Vec<Point2> = (0..n)
                    .filter(|&i| {
                        let prev = polygon.points[(i + n - 1) % n];
                        let here = polygon.points[i];
                        let next = polygon.points[(i + 1) % n];
                        let cross = (here.x as i128 - prev.x as i128) * (next.y as i128 - here.y as i128)
                            - (here.y as i128 - prev.y as i128) * (next.x as i128 - here.x as i128);
                        cross != 0
                    })
                    .map(|i| polygon.points[i])
                    .collect();
                (points.len() >= 3).then(|| Polygon::new(points))
            })
            .collect::<Vec<_>>()
            .into()
    }

    pub fn postprocess(&self, args: PostprocessArgs) -> String {
        format!(";POSTPROCESSED BY {}\n{}", self.name, args.gcode)
    }

    /// 在轮廓包围盒内生成水平扫描线
    pub fn infill(&self, args: InfillArgs) -> InfillResult {
        let spacing = args
            .settings
            .get("line_distance")
            .and_then(|v| v.parse::<Coord>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_LINE_DISTANCE);

        let lines = match args.outline.bounding_box() {
            Some((min, max)) => std::iter::successors(Some(min.y), |y| y.checked_add(spacing))
                .take_while(|y| *y <= max.y)
                .map(|y| Polyline::new(vec![Point2::new(min.x, y), Point2::new(max.x, y)]))
                .collect(),
            None => Vec::new(),
        };

        InfillResult {
            lines,
            polygons: Polygons::default(),
        }
    }
}

#[async_trait]
impl PluginService for ReferencePlugin {
    fn handshake(&self, request: &HandshakeRequest) -> HandshakeResponse {
        debug!(
            "Handshake from {} v{} for slot '{}' (range '{}')",
            request.engine_name, request.engine_version, request.slot, request.version_range
        );
        HandshakeResponse {
            plugin_name: self.name.clone(),
            plugin_version: self.version.clone(),
            slot_version: self.slot_version.clone(),
            wire_version: WIRE_VERSION,
            slots: self.slots.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    async fn handle(&self, slot: SlotId, payload: Value) -> Result<Value, String> {
        if !self.slots.contains(&slot) {
            return Err(format!("plugin '{}' does not serve slot '{}'", self.name, slot));
        }
        match slot {
            SlotId::Simplify => serve_slot::<SimplifySlot>(payload, |args| self.simplify(args)),
            SlotId::Postprocess => serve_slot::<PostprocessSlot>(payload, |args| self.postprocess(args)),
            SlotId::InfillGenerate => serve_slot::<InfillSlot>(payload, |args| self.infill(args)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_simplify_removes_collinear_vertices() {
        let plugin = ReferencePlugin::new("ref");
        let args = SimplifyArgs {
            polygons: Polygons::new(vec![Polygon::new(vec![
                Point2::new(0, 0),
                Point2::new(5, 0),
                Point2::new(10, 0),
                Point2::new(10, 10),
            ])]),
            max_resolution: 1,
            max_deviation: 1,
            max_area_deviation: 1,
        };
        let result = plugin.simplify(args);
        assert_eq!(
            result.paths[0].points,
            vec![Point2::new(0, 0), Point2::new(10, 0), Point2::new(10, 10)]
        );
    }

    #[test]
    fn test_infill_scan_lines() {
        let plugin = ReferencePlugin::new("ref");
        let mut settings = BTreeMap::new();
        settings.insert("line_distance".to_string(), "25".to_string());
        let result = plugin.infill(InfillArgs {
            outline: Polygons::rectangle(Point2::new(0, 0), Point2::new(100, 50)),
            pattern: "lines".to_string(),
            settings,
        });

        assert_eq!(result.lines.len(), 3);
        assert_eq!(result.lines[2].points, vec![Point2::new(0, 50), Point2::new(100, 50)]);
        assert!(result.polygons.is_empty());
    }

    #[tokio::test]
    async fn test_handle_dispatches_by_slot() {
        let plugin = ReferencePlugin::new("ref");
        let payload = serde_json::json!({"gcode": "G28"});
        let response = plugin.handle(SlotId::Postprocess, payload).await.unwrap();
        assert_eq!(response["gcode"], ";POSTPROCESSED BY ref\nG28");

        let err = plugin.handle(SlotId::Simplify, serde_json::json!({})).await.unwrap_err();
        assert!(err.contains("simplify request"));
    }

    #[tokio::test]
    async fn test_unserved_slot_is_refused() {
        let plugin = ReferencePlugin::new("ref").with_slots(&[SlotId::Postprocess]);
        let err = plugin
            .handle(SlotId::Simplify, serde_json::json!({"polygons": {"paths": []}}))
            .await
            .unwrap_err();
        assert_eq!(err, "plugin 'ref' does not serve slot 'simplify'");
    }
}
