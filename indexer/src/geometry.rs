use geo::{Distance, Haversine, Point};

/// Points are (longitude, latitude) degrees throughout; all distances
/// are kilometers.
pub fn distance_km(a: Point<f64>, b: Point<f64>) -> f64 {
    Haversine.distance(a, b) / 1000.0
}

/// The result of snapping one point onto one path segment.
#[derive(Clone, Copy, Debug)]
pub struct SegmentProjection {
    pub snapped: Point<f64>,
    /// Perpendicular offset from the raw point to the snapped point.
    pub deviation_km: f64,
    /// Distance from the segment's start waypoint to the snapped point.
    pub along_km: f64,
}

/// Snaps `point` to the segment from `start` to `end`, clamping to the
/// endpoints. The foot of the perpendicular is found on a local
/// equirectangular plane centered on the segment start (shape segments
/// are short, so the planar error is negligible); the reported
/// distances are haversine.
pub fn project_onto_segment(
    point: Point<f64>,
    start: Point<f64>,
    end: Point<f64>,
) -> SegmentProjection {
    let cos_lat = start.y().to_radians().cos();
    let bx = (end.x() - start.x()) * cos_lat;
    let by = end.y() - start.y();
    let px = (point.x() - start.x()) * cos_lat;
    let py = point.y() - start.y();

    let len_sq = bx * bx + by * by;
    let t = if len_sq == 0.0 {
        // Degenerate segment; snap to its start.
        0.0
    } else {
        ((px * bx + py * by) / len_sq).clamp(0.0, 1.0)
    };

    let snapped = Point::new(
        start.x() + (end.x() - start.x()) * t,
        start.y() + (end.y() - start.y()) * t,
    );
    SegmentProjection {
        snapped,
        deviation_km: distance_km(point, snapped),
        along_km: distance_km(start, snapped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // 0.009 degrees of longitude at the equator is very close to 1 km.
    const KM_IN_DEG: f64 = 0.009;

    #[test]
    fn haversine_sanity() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(KM_IN_DEG, 0.0);
        assert_relative_eq!(distance_km(a, b), 1.0, max_relative = 0.01);
    }

    #[test]
    fn projects_perpendicular_foot() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(KM_IN_DEG, 0.0);
        // Above the midpoint, 1 km north.
        let p = Point::new(KM_IN_DEG / 2.0, KM_IN_DEG);
        let proj = project_onto_segment(p, start, end);
        assert_relative_eq!(proj.along_km, 0.5, max_relative = 0.01);
        assert_relative_eq!(proj.deviation_km, 1.0, max_relative = 0.01);
        assert_relative_eq!(proj.snapped.x(), KM_IN_DEG / 2.0, max_relative = 0.01);
        assert_relative_eq!(proj.snapped.y(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn clamps_to_endpoints() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(KM_IN_DEG, 0.0);
        let before = project_onto_segment(Point::new(-KM_IN_DEG, 0.0), start, end);
        assert_relative_eq!(before.along_km, 0.0, epsilon = 1e-9);
        let after = project_onto_segment(Point::new(2.0 * KM_IN_DEG, 0.0), start, end);
        assert_relative_eq!(after.along_km, 1.0, max_relative = 0.01);
    }

    #[test]
    fn degenerate_segment_snaps_to_start() {
        let start = Point::new(1.0, 1.0);
        let proj = project_onto_segment(Point::new(1.0, 2.0), start, start);
        assert_eq!(proj.snapped, start);
        assert_relative_eq!(proj.along_km, 0.0, epsilon = 1e-9);
    }
}
