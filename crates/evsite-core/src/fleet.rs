//! The demand fleet: fixed vehicle home positions.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};
use crate::geometry::Point;

/// Immutable set of vehicle positions the network must serve.
///
/// Validated at construction; never changes afterwards. All candidate
/// seeding and proximity accounting works against these coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fleet {
    points: Vec<Point>,
}

impl Fleet {
    /// Build a fleet from vehicle positions.
    ///
    /// Fails with a validation error when fewer than two vehicles are
    /// given; a single point makes every placement question degenerate.
    pub fn new(points: Vec<Point>) -> PlanResult<Self> {
        if points.len() < 2 {
            return Err(PlanError::Validation(
                "at least two vehicle positions are required".into(),
            ));
        }
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Tightest axis-aligned box around the fleet: `(lower_left, upper_right)`.
    pub fn bounding_box(&self) -> (Point, Point) {
        let mut min = self.points[0];
        let mut max = self.points[0];
        for p in &self.points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        (min, max)
    }
}
