//! 引擎原生几何类型
//!
//! 坐标统一为整数微米，与引擎切片内核一致

use serde::{Deserialize, Serialize};

/// 整数坐标（微米）
pub type Coord = i64;

/// 二维点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: Coord,
    pub y: Coord,
}

impl Point2 {
    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }
}

/// 闭合多边形
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Polygon {
    pub points: Vec<Point2>,
}

impl Polygon {
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 有向面积的两倍（逆时针为正）
    pub fn doubled_area(&self) -> i128 {
        let n = self.points.len();
        if n < 3 {
            return 0;
        }
        (0..n)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                a.x as i128 * b.y as i128 - b.x as i128 * a.y as i128
            })
            .sum()
    }
}

impl From<Vec<Point2>> for Polygon {
    fn from(points: Vec<Point2>) -> Self {
        Self::new(points)
    }
}

/// 开放折线（填充线段等）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Polyline {
    pub points: Vec<Point2>,
}

impl Polyline {
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }
}

/// 多边形集合
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Polygons {
    pub paths: Vec<Polygon>,
}

impl Polygons {
    pub fn new(paths: Vec<Polygon>) -> Self {
        Self { paths }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.paths.iter().map(Polygon::len).sum()
    }

    /// 轴对齐包围盒 (min, max)
    pub fn bounding_box(&self) -> Option<(Point2, Point2)> {
        let mut points = self.paths.iter().flat_map(|p| p.points.iter());
        let first = *points.next()?;
        Some(points.fold((first, first), |(min, max), p| {
            (
                Point2::new(min.x.min(p.x), min.y.min(p.y)),
                Point2::new(max.x.max(p.x), max.y.max(p.y)),
            )
        }))
    }

    /// 以四个角点构造矩形
    pub fn rectangle(min: Point2, max: Point2) -> Self {
        Self::new(vec![Polygon::new(vec![
            min,
            Point2::new(max.x, min.y),
            max,
            Point2::new(min.x, max.y),
        ])])
    }
}

impl From<Vec<Polygon>> for Polygons {
    fn from(paths: Vec<Polygon>) -> Self {
        Self::new(paths)
    }
}
