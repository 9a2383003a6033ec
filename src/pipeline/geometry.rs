//! Target geometry: reduce the best region(s) to normalized measurements.

use super::regions::Region;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    fn new(x: u32, y: u32) -> Self {
        Self {
            x: f64::from(x),
            y: f64::from(y),
        }
    }
}

/// Quadrilateral spanning the outer corners of an ordered region pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub upper_left: Point,
    pub upper_right: Point,
    pub lower_left: Point,
    pub lower_right: Point,
}

impl Quad {
    /// Side by side: `left` supplies the left edge, `right` the right edge.
    pub fn horizontal(left: &Region, right: &Region) -> Self {
        let (l, r) = (left.bbox, right.bbox);
        Self {
            upper_left: Point::new(l.x, l.y),
            upper_right: Point::new(r.right(), r.y),
            lower_left: Point::new(l.x, l.bottom()),
            lower_right: Point::new(r.right(), r.bottom()),
        }
    }

    /// Stacked: `top` supplies the upper edge, `bottom` the lower edge.
    pub fn vertical(top: &Region, bottom: &Region) -> Self {
        let (t, b) = (top.bbox, bottom.bbox);
        Self {
            upper_left: Point::new(t.x, t.y),
            upper_right: Point::new(t.right(), t.y),
            lower_left: Point::new(b.x, b.bottom()),
            lower_right: Point::new(b.right(), b.bottom()),
        }
    }

    pub fn width(&self) -> f64 {
        (self.upper_right.x - self.upper_left.x).max(self.lower_right.x - self.lower_left.x)
    }

    /// Vertical span of the left edge.
    pub fn height(&self) -> f64 {
        self.lower_left.y - self.upper_left.y
    }

    /// Trapezoid area from the top and bottom edge lengths and the left-edge height.
    pub fn area(&self) -> f64 {
        let height = self.height();
        0.5 * (self.lower_right.x - self.lower_left.x) * height
            + 0.5 * (self.upper_right.x - self.upper_left.x) * height
    }

    pub fn centre(&self) -> Point {
        Point {
            x: (self.upper_left.x + self.upper_right.x + self.lower_left.x + self.lower_right.x) / 4.0,
            y: (self.upper_left.y + self.upper_right.y + self.lower_left.y + self.lower_right.y) / 4.0,
        }
    }
}

/// Measurements normalized to the frame: x/y/width/height by the frame's
/// linear dimensions, area by its pixel count.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TargetGeometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub area: f64,
}

impl TargetGeometry {
    fn normalized(centre: Point, width: f64, height: f64, area: f64, frame: (u32, u32)) -> Self {
        let w = f64::from(frame.0.max(1));
        let h = f64::from(frame.1.max(1));
        Self {
            x: centre.x / w,
            y: centre.y / h,
            width: width / w,
            height: height / h,
            area: area / (w * h),
        }
    }
}

pub fn single_target(region: &Region, frame: (u32, u32)) -> TargetGeometry {
    let b = region.bbox;
    let centre = Point {
        x: f64::from(b.x) + f64::from(b.width) / 2.0,
        y: f64::from(b.y) + f64::from(b.height) / 2.0,
    };
    TargetGeometry::normalized(
        centre,
        f64::from(b.width),
        f64::from(b.height),
        b.area() as f64,
        frame,
    )
}

/// Order the pair by bounding-box origin along the pairing axis, then build
/// the spanning quadrilateral. The result does not depend on argument order.
pub fn pair_quad(a: &Region, b: &Region, vertical: bool) -> Quad {
    let key = |r: &Region| {
        if vertical {
            (r.bbox.y, r.bbox.x)
        } else {
            (r.bbox.x, r.bbox.y)
        }
    };
    let (first, second) = if key(a) <= key(b) { (a, b) } else { (b, a) };
    if vertical {
        Quad::vertical(first, second)
    } else {
        Quad::horizontal(first, second)
    }
}

pub fn dual_target(a: &Region, b: &Region, vertical: bool, frame: (u32, u32)) -> (Quad, TargetGeometry) {
    let quad = pair_quad(a, b, vertical);
    let geometry = TargetGeometry::normalized(quad.centre(), quad.width(), quad.height(), quad.area(), frame);
    (quad, geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::regions::BoundingBox;

    fn region(x: u32, y: u32, width: u32, height: u32) -> Region {
        Region {
            label: 1,
            bbox: BoundingBox {
                x,
                y,
                width,
                height,
            },
            pixel_count: u64::from(width) * u64::from(height),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn single_target_normalizes_by_frame() {
        let g = single_target(&region(140, 90, 40, 60), (320, 240));
        assert!(close(g.width, 0.125));
        assert!(close(g.height, 0.25));
        assert!(close(g.area, 0.03125));
        assert!(close(g.x, 0.5));
        assert!(close(g.y, 0.5));
    }

    #[test]
    fn horizontal_pair_is_order_independent() {
        let left = region(40, 80, 20, 50);
        let right = region(200, 90, 20, 40);
        let (q1, g1) = dual_target(&left, &right, false, (320, 240));
        let (q2, g2) = dual_target(&right, &left, false, (320, 240));
        assert_eq!(q1, q2);
        assert_eq!(g1, g2);
    }

    #[test]
    fn vertical_pair_is_order_independent() {
        let top = region(100, 20, 60, 10);
        let bottom = region(90, 150, 80, 10);
        let (_, g1) = dual_target(&top, &bottom, true, (320, 240));
        let (_, g2) = dual_target(&bottom, &top, true, (320, 240));
        assert_eq!(g1, g2);
    }

    #[test]
    fn horizontal_height_uses_left_edge_only() {
        // Left edge spans 50px, right edge 40px; the left edge wins.
        let left = region(40, 80, 20, 50);
        let right = region(200, 90, 20, 40);
        let (quad, g) = dual_target(&left, &right, false, (320, 240));
        assert!(close(quad.width(), 180.0));
        assert!(close(quad.height(), 50.0));
        assert!(close(quad.area(), 9000.0));
        assert!(close(g.width, 180.0 / 320.0));
        assert!(close(g.height, 50.0 / 240.0));
        assert!(close(g.area, 9000.0 / 76800.0));
    }

    #[test]
    fn vertical_quad_is_a_trapezoid() {
        let top = region(100, 20, 60, 10);
        let bottom = region(90, 150, 80, 10);
        let quad = pair_quad(&top, &bottom, true);
        assert!(close(quad.width(), 80.0));
        assert!(close(quad.height(), 140.0));
        assert!(close(quad.area(), 0.5 * 80.0 * 140.0 + 0.5 * 60.0 * 140.0));
    }
}
