//! Distance and spatial-aggregate helpers built on top of `geo`'s haversine implementation.
//!
//! All inputs/outputs here are plain degrees; callers crossing the storage boundary convert
//! through [`crate::model::to_degrees`]/[`crate::model::from_degrees`] first.

use geo::{Distance, Haversine, Point};

/// Great-circle distance between two `(lat, lon)` points, in kilometers.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let p1 = Point::new(a.1, a.0);
    let p2 = Point::new(b.1, b.0);
    Haversine.distance(p1, p2) / 1000.0
}

/// Unweighted centroid of a set of points, in degrees. Panics on an empty slice; callers are
/// expected to have already established at least one member.
pub fn centroid(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let (sum_lat, sum_lon) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lon), (p_lat, p_lon)| (lat + p_lat, lon + p_lon));
    (sum_lat / n, sum_lon / n)
}

/// Smallest radius (km) around `center` that encloses every point in `points`.
pub fn enclosing_radius_km(center: (f64, f64), points: &[(f64, f64)]) -> f64 {
    points
        .iter()
        .map(|p| haversine_km(center, *p))
        .fold(0.0_f64, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        assert!(haversine_km((50.0, 10.0), (50.0, 10.0)) < 1e-9);
    }

    #[test]
    fn one_degree_longitude_at_equator_is_about_111km() {
        let d = haversine_km((0.0, 0.0), (0.0, 1.0));
        assert!((d - 111.19).abs() < 1.0);
    }

    #[test]
    fn centroid_of_square_is_its_middle() {
        let pts = [(0.0, 0.0), (0.0, 2.0), (2.0, 0.0), (2.0, 2.0)];
        let c = centroid(&pts);
        assert!((c.0 - 1.0).abs() < 1e-9);
        assert!((c.1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn enclosing_radius_covers_farthest_point() {
        let center = (0.0, 0.0);
        let pts = [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0)];
        let radius = enclosing_radius_km(center, &pts);
        for p in pts {
            assert!(haversine_km(center, p) <= radius + 1e-6);
        }
    }
}
