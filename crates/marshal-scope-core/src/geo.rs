use serde::{Deserialize, Serialize};

use crate::ScopeError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// # Errors
    /// Returns [`ScopeError::Validation`] for non-finite or out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ScopeError> {
        let point = Self {
            latitude,
            longitude,
        };
        point.validate()?;
        Ok(point)
    }

    /// # Errors
    /// Returns [`ScopeError::Validation`] for non-finite or out-of-range coordinates.
    pub fn validate(&self) -> Result<(), ScopeError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ScopeError::Validation(format!(
                "latitude MUST be within [-90, 90], got {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ScopeError::Validation(format!(
                "longitude MUST be within [-180, 180], got {}",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Ordered vertex list of a simple polygon. The closing edge is implicit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Polygon(pub Vec<GeoPoint>);

impl Polygon {
    #[must_use]
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self(points)
    }

    #[must_use]
    pub fn points(&self) -> &[GeoPoint] {
        &self.0
    }

    /// Fewer than three vertices cannot enclose anything.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.0.len() < 3
    }

    /// Even-odd ray casting along +longitude. Boundary points may land on either side,
    /// but the answer for a given point and polygon never changes.
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        if self.is_degenerate() || !self.bounding_box_contains(point) {
            return false;
        }

        let (x, y) = (point.longitude, point.latitude);
        let vertices = &self.0;
        let mut inside = false;
        let mut previous = vertices.len() - 1;
        for current in 0..vertices.len() {
            let (xi, yi) = (vertices[current].longitude, vertices[current].latitude);
            let (xj, yj) = (vertices[previous].longitude, vertices[previous].latitude);
            // yi != yj whenever the edge straddles the ray, so the division is safe.
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            previous = current;
        }
        inside
    }

    fn bounding_box_contains(&self, point: GeoPoint) -> bool {
        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        let mut min_lng = f64::INFINITY;
        let mut max_lng = f64::NEG_INFINITY;
        for vertex in &self.0 {
            min_lat = min_lat.min(vertex.latitude);
            max_lat = max_lat.max(vertex.latitude);
            min_lng = min_lng.min(vertex.longitude);
            max_lng = max_lng.max(vertex.longitude);
        }
        (min_lat..=max_lat).contains(&point.latitude)
            && (min_lng..=max_lng).contains(&point.longitude)
    }

    /// # Errors
    /// Returns [`ScopeError::Validation`] when any vertex is out of range.
    pub fn validate(&self) -> Result<(), ScopeError> {
        self.0.iter().try_for_each(GeoPoint::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint {
            latitude,
            longitude,
        }
    }

    fn square() -> Polygon {
        Polygon::new(vec![
            point(51.0, -1.0),
            point(51.0, -0.9),
            point(51.1, -0.9),
            point(51.1, -1.0),
        ])
    }

    // Test IDs: TGEO-001
    #[test]
    fn point_strictly_inside_convex_polygon_is_contained() {
        assert!(square().contains(point(51.05, -0.95)));
    }

    // Test IDs: TGEO-002
    #[test]
    fn point_strictly_outside_is_not_contained() {
        assert!(!square().contains(point(51.2, -0.95)));
        assert!(!square().contains(point(51.05, -0.8)));
        assert!(!square().contains(point(-51.05, 0.95)));
    }

    // Test IDs: TGEO-003
    #[test]
    fn degenerate_polygons_never_contain() {
        let line = Polygon::new(vec![point(51.0, -1.0), point(51.1, -0.9)]);
        assert!(line.is_degenerate());
        assert!(!line.contains(point(51.05, -0.95)));
        assert!(!Polygon::default().contains(point(0.0, 0.0)));
    }

    // Test IDs: TGEO-004
    #[test]
    fn concave_polygon_excludes_the_notch() {
        // U shape opening to the north.
        let u_shape = Polygon::new(vec![
            point(0.0, 0.0),
            point(0.0, 3.0),
            point(3.0, 3.0),
            point(3.0, 2.0),
            point(1.0, 2.0),
            point(1.0, 1.0),
            point(3.0, 1.0),
            point(3.0, 0.0),
        ]);
        assert!(u_shape.contains(point(2.0, 0.5)));
        assert!(u_shape.contains(point(2.0, 2.5)));
        assert!(!u_shape.contains(point(2.0, 1.5)));
    }

    // Test IDs: TGEO-005
    #[test]
    fn boundary_answers_are_stable_across_repeats() {
        let polygon = square();
        let on_edge = point(51.0, -0.95);
        let first = polygon.contains(on_edge);
        for _ in 0..100 {
            assert_eq!(polygon.contains(on_edge), first);
        }
    }

    #[test]
    fn explicitly_closed_ring_behaves_like_open_ring() {
        let mut closed = square().0;
        closed.push(point(51.0, -1.0));
        let closed = Polygon::new(closed);
        assert!(closed.contains(point(51.05, -0.95)));
        assert!(!closed.contains(point(51.2, -0.95)));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, f64::NAN).is_err());
        assert!(GeoPoint::new(51.5, -0.12).is_ok());
    }
}
