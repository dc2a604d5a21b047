//! Planar geometry for walls, zones and line of sight
//!
//! Everything is f64 in arena units with y pointing up, matching the
//! left/bottom/width/height convention stages use to describe rectangles.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::consts::VERTEX_FUDGE;
use crate::signum;

/// A line segment between two points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line2D {
    pub p1: DVec2,
    pub p2: DVec2,
}

impl Line2D {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            p1: DVec2::new(x1, y1),
            p2: DVec2::new(x2, y2),
        }
    }

    pub fn from_points(p1: DVec2, p2: DVec2) -> Self {
        Self { p1, p2 }
    }

    /// Vector from `p1` to `p2`
    pub fn direction(&self) -> DVec2 {
        self.p2 - self.p1
    }

    pub fn length(&self) -> f64 {
        self.direction().length()
    }

    /// Unit normal to the left of the direction (zero for a degenerate line)
    pub fn normal(&self) -> DVec2 {
        self.direction().perp().normalize_or_zero()
    }

    /// Distance from the infinite line, positive on the side of [`Self::normal`]
    pub fn signed_distance(&self, p: DVec2) -> f64 {
        self.normal().dot(p - self.p1)
    }

    /// Position of the projection of `p` along the segment, 0 at `p1` and 1 at `p2`
    pub fn projection_param(&self, p: DVec2) -> f64 {
        let d = self.direction();
        let len_sq = d.length_squared();
        if len_sq == 0.0 {
            0.0
        } else {
            (p - self.p1).dot(d) / len_sq
        }
    }

    /// Closest point on the segment to `p`
    pub fn closest_point(&self, p: DVec2) -> DVec2 {
        let t = self.projection_param(p).clamp(0.0, 1.0);
        self.p1 + self.direction() * t
    }

    /// Distance from `p` to the segment
    pub fn distance_to(&self, p: DVec2) -> f64 {
        (p - self.closest_point(p)).length()
    }

    /// Intersection point of two segments, endpoints included
    pub fn intersection(&self, other: &Line2D) -> Option<DVec2> {
        let r = self.direction();
        let s = other.direction();
        let denom = r.perp_dot(s);
        let qp = other.p1 - self.p1;
        if denom == 0.0 {
            // Parallel: only collinear overlap counts
            if qp.perp_dot(r) != 0.0 {
                return None;
            }
            let r_len_sq = r.length_squared();
            if r_len_sq == 0.0 {
                return (other.distance_to(self.p1) == 0.0).then_some(self.p1);
            }
            let t0 = qp.dot(r) / r_len_sq;
            let t1 = t0 + s.dot(r) / r_len_sq;
            let (lo, hi) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
            if hi < 0.0 || lo > 1.0 {
                return None;
            }
            return Some(self.p1 + r * lo.max(0.0));
        }
        let t = qp.perp_dot(s) / denom;
        let u = qp.perp_dot(r) / denom;
        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
            Some(self.p1 + r * t)
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &Line2D) -> bool {
        self.intersection(other).is_some()
    }
}

/// A circle, used for ship hulls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle2D {
    pub center: DVec2,
    pub radius: f64,
}

impl Circle2D {
    pub fn new(center: DVec2, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn contains(&self, p: DVec2) -> bool {
        self.center.distance_squared(p) <= self.radius * self.radius
    }

    /// Whether the segment passes within the circle
    pub fn intersects_line(&self, line: &Line2D) -> bool {
        line.distance_to(self.center) <= self.radius
    }

    /// Strict overlap (touching circles do not overlap)
    pub fn overlaps(&self, other: &Circle2D) -> bool {
        let r = self.radius + other.radius;
        self.center.distance_squared(other.center) < r * r
    }
}

/// Axis-aligned rectangle shared by walls and zones
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, bottom: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            bottom,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn top(&self) -> f64 {
        self.bottom + self.height
    }

    /// Boundary segments, counter-clockwise from the bottom edge
    pub fn lines(&self) -> [Line2D; 4] {
        let (l, b, r, t) = (self.left, self.bottom, self.right(), self.top());
        [
            Line2D::new(l, b, r, b),
            Line2D::new(r, b, r, t),
            Line2D::new(r, t, l, t),
            Line2D::new(l, t, l, b),
        ]
    }

    /// Strictly inside
    pub fn contains_strict(&self, p: DVec2) -> bool {
        p.x > self.left && p.x < self.right() && p.y > self.bottom && p.y < self.top()
    }

    /// Inside or on the boundary
    pub fn contains(&self, p: DVec2) -> bool {
        p.x >= self.left && p.x <= self.right() && p.y >= self.bottom && p.y <= self.top()
    }
}

/// A solid rectangular obstacle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub rect: Rect,
}

impl Wall {
    pub fn new(left: f64, bottom: f64, width: f64, height: f64) -> Self {
        Self {
            rect: Rect::new(left, bottom, width, height),
        }
    }

    pub fn lines(&self) -> [Line2D; 4] {
        self.rect.lines()
    }
}

/// A tagged region ships can be tested against; never blocks movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub rect: Rect,
    pub tag: String,
}

impl Zone {
    pub fn new(left: f64, bottom: f64, width: f64, height: f64, tag: impl Into<String>) -> Self {
        Self {
            rect: Rect::new(left, bottom, width, height),
            tag: tag.into(),
        }
    }

    pub fn contains(&self, p: DVec2) -> bool {
        self.rect.contains(p)
    }

    /// Whether a ship is inside now or crossed a boundary moving from `from` to `to`
    pub fn touched(&self, from: DVec2, to: DVec2) -> bool {
        if self.contains(to) {
            return true;
        }
        let path = Line2D::from_points(from, to);
        self.rect.lines().iter().any(|edge| edge.intersects(&path))
    }
}

/// True when no blocking segment crosses the sight line
pub fn has_vision(sight: &Line2D, blockers: &[Line2D]) -> bool {
    !blockers.iter().any(|wall| wall.intersects(sight))
}

/// Sight line from `origin` to `target`, pulled back from the target on each axis
///
/// Targets on a wall vertex or edge would otherwise be blocked by the wall
/// they sit on.
pub fn vertex_sight_line(origin: DVec2, target: DVec2) -> Line2D {
    let end = DVec2::new(
        target.x - signum(target.x - origin.x) * VERTEX_FUDGE,
        target.y - signum(target.y - origin.y) * VERTEX_FUDGE,
    );
    Line2D::from_points(origin, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_intersection() {
        let a = Line2D::new(0.0, 0.0, 10.0, 10.0);
        let b = Line2D::new(0.0, 10.0, 10.0, 0.0);
        let p = a.intersection(&b).unwrap();
        assert!((p - DVec2::new(5.0, 5.0)).length() < 1e-12);

        let c = Line2D::new(20.0, 0.0, 30.0, 0.0);
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_line_touching_endpoint_intersects() {
        let a = Line2D::new(0.0, 0.0, 10.0, 0.0);
        let b = Line2D::new(10.0, 0.0, 10.0, 5.0);
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_collinear_overlap() {
        let a = Line2D::new(0.0, 0.0, 10.0, 0.0);
        let b = Line2D::new(5.0, 0.0, 15.0, 0.0);
        assert!(a.intersects(&b));
        let c = Line2D::new(11.0, 0.0, 15.0, 0.0);
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_signed_distance_sides() {
        // Direction +x, normal +y
        let line = Line2D::new(0.0, 0.0, 10.0, 0.0);
        assert!((line.signed_distance(DVec2::new(3.0, 4.0)) - 4.0).abs() < 1e-12);
        assert!((line.signed_distance(DVec2::new(3.0, -2.0)) + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_circle_line() {
        let circle = Circle2D::new(DVec2::new(5.0, 3.0), 4.0);
        let line = Line2D::new(0.0, 0.0, 10.0, 0.0);
        assert!(circle.intersects_line(&line));
        let grazing = Circle2D::new(DVec2::new(5.0, 4.0), 4.0);
        assert!(grazing.intersects_line(&line));

        let far = Circle2D::new(DVec2::new(5.0, 30.0), 4.0);
        assert!(!far.intersects_line(&line));
    }

    #[test]
    fn test_circle_overlap_is_strict() {
        let a = Circle2D::new(DVec2::ZERO, 8.0);
        let b = Circle2D::new(DVec2::new(16.0, 0.0), 8.0);
        assert!(!a.overlaps(&b));
        let c = Circle2D::new(DVec2::new(15.9, 0.0), 8.0);
        assert!(a.overlaps(&c));
    }

    #[test]
    fn test_zone_touched_by_crossing() {
        let zone = Zone::new(10.0, 10.0, 10.0, 10.0, "goal");
        assert!(zone.contains(DVec2::new(10.0, 15.0)));
        assert!(zone.touched(DVec2::new(0.0, 15.0), DVec2::new(30.0, 15.0)));
        assert!(!zone.touched(DVec2::new(0.0, 0.0), DVec2::new(5.0, 5.0)));
    }

    #[test]
    fn test_vision_blocked_by_wall() {
        let wall = Wall::new(40.0, 0.0, 20.0, 100.0);
        let lines = wall.lines();
        let blocked = Line2D::new(0.0, 50.0, 100.0, 50.0);
        assert!(!has_vision(&blocked, &lines));
        let clear = Line2D::new(0.0, 150.0, 100.0, 150.0);
        assert!(has_vision(&clear, &lines));
    }

    #[test]
    fn test_vertex_sight_line_not_blocked_by_own_corner() {
        let wall = Wall::new(40.0, 40.0, 20.0, 20.0);
        let lines = wall.lines();
        let corner = DVec2::new(40.0, 40.0);
        let sight = vertex_sight_line(DVec2::new(0.0, 0.0), corner);
        assert!(has_vision(&sight, &lines));
        assert!(!has_vision(&Line2D::from_points(DVec2::ZERO, corner), &lines));
    }
}
