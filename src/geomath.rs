// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Great-circle geometry for stop selection.

use serde::{Deserialize, Serialize};

/// Returned for targets without a known position.
/// Any real angular distance lies in `[0, PI]`.
pub const UNPOSITIONED_DISTANCE: f64 = 4.0;

/// Mean earth radius, for converting angular distances to metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Central angle in radians between two points, using the vector form of
/// Vincenty's formula on a sphere:
///
/// `atan2(|n1 x n2|, n1 . n2)`
///
/// which stays well conditioned for both tiny and near-antipodal separations,
/// unlike the plain haversine or spherical law of cosines.
pub fn angular_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // canonical argument order keeps the result bit-for-bit symmetric
    let ((lat1, lon1), (lat2, lon2)) = if (lat1, lon1) <= (lat2, lon2) {
        ((lat1, lon1), (lat2, lon2))
    } else {
        ((lat2, lon2), (lat1, lon1))
    };

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).abs().to_radians();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let (sin_phi2, cos_phi2) = phi2.sin_cos();
    let (sin_dl, cos_dl) = delta_lambda.sin_cos();

    let cross_a = cos_phi2 * sin_dl;
    let cross_b = cos_phi1 * sin_phi2 - sin_phi1 * cos_phi2 * cos_dl;
    let dot = sin_phi1 * sin_phi2 + cos_phi1 * cos_phi2 * cos_dl;

    (cross_a * cross_a + cross_b * cross_b).sqrt().atan2(dot)
}

/// Distance from `origin` to an optional target, [`UNPOSITIONED_DISTANCE`]
/// when the target has no position.
pub fn distance_to(origin: Coordinate, target: Option<Coordinate>) -> f64 {
    match target {
        Some(target) => angular_distance(origin.lat, origin.lon, target.lat, target.lon),
        None => UNPOSITIONED_DISTANCE,
    }
}

pub fn angular_to_metres(angle: f64) -> f64 {
    angle * EARTH_RADIUS_M
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn same_point_is_zero() {
        for (lat, lon) in [(50.85, 4.35), (0.0, 0.0), (-89.9, 179.9), (90.0, 0.0)] {
            assert_eq!(angular_distance(lat, lon, lat, lon), 0.0);
        }
    }

    #[test]
    fn symmetric() {
        let pairs = [
            ((50.8466, 4.3528), (50.8503, 4.3517)),
            ((-33.86, 151.2), (51.5, -0.12)),
            ((10.0, 20.0), (-10.0, -160.0)),
        ];

        for ((a_lat, a_lon), (b_lat, b_lon)) in pairs {
            assert_eq!(
                angular_distance(a_lat, a_lon, b_lat, b_lon),
                angular_distance(b_lat, b_lon, a_lat, a_lon)
            );
        }
    }

    #[test]
    fn antipodal_is_pi() {
        let d = angular_distance(0.0, 0.0, 0.0, 180.0);
        assert!((d - PI).abs() < 1e-12);

        let d = angular_distance(45.0, 10.0, -45.0, -170.0);
        assert!((d - PI).abs() < 1e-9);
    }

    #[test]
    fn small_distances_keep_precision() {
        // roughly one metre apart in central Brussels
        let d = angular_distance(50.8466, 4.3528, 50.846609, 4.3528);
        let metres = angular_to_metres(d);
        assert!(metres > 0.9 && metres < 1.1, "got {metres}");
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = angular_distance(50.0, 4.0, 51.0, 4.0);
        assert!((d - 1f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn unpositioned_sorts_after_everything() {
        let origin = Coordinate::new(50.85, 4.35);
        let farthest = distance_to(origin, Some(Coordinate::new(-50.85, -175.65)));

        assert!(farthest <= PI);
        assert!(distance_to(origin, None) > farthest);
        assert_eq!(distance_to(origin, None), UNPOSITIONED_DISTANCE);
    }
}
