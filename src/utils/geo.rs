use crate::model::location::Coordinate;

/// Mean earth radius used by the spherical approximation.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (haversine).
///
/// Inputs are assumed to be in range; `Coordinate::validate` is the
/// caller's job.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // clamp guards asin against h drifting past 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

#[inline]
pub fn within_radius(center: Coordinate, point: Coordinate, radius_m: f64) -> bool {
    distance_meters(center, point) <= radius_m
}

/// Point `meters` due north of `origin`. Handy for building fixtures at a
/// known distance.
pub fn offset_north(origin: Coordinate, meters: f64) -> Coordinate {
    let d_lat = (meters / EARTH_RADIUS_M).to_degrees();
    Coordinate::new(origin.latitude + d_lat, origin.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DHAKA: Coordinate = Coordinate {
        latitude: 23.8103,
        longitude: 90.4125,
    };
    const CHITTAGONG: Coordinate = Coordinate {
        latitude: 22.3569,
        longitude: 91.7832,
    };

    #[test]
    fn coincident_points_are_zero_apart() {
        assert_eq!(distance_meters(DHAKA, DHAKA), 0.0);
        let pole = Coordinate::new(90.0, 0.0);
        assert_eq!(distance_meters(pole, pole), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (DHAKA, CHITTAGONG),
            (Coordinate::new(-33.86, 151.21), Coordinate::new(51.5, -0.12)),
            (Coordinate::new(0.0, 179.9), Coordinate::new(0.0, -179.9)),
        ];
        for (a, b) in pairs {
            let ab = distance_meters(a, b);
            let ba = distance_meters(b, a);
            assert!((ab - ba).abs() < 1e-6, "{ab} vs {ba}");
        }
    }

    #[test]
    fn known_city_distance() {
        // ~213 km between Dhaka and Chittagong
        let d = distance_meters(DHAKA, CHITTAGONG);
        assert!((d - 213_000.0).abs() < 3_000.0, "got {d}");
    }

    #[test]
    fn antipodal_points_do_not_produce_nan() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn offset_north_lands_at_requested_distance() {
        for meters in [10.0, 350.0, 800.0, 2_500.0] {
            let p = offset_north(DHAKA, meters);
            assert!((distance_meters(DHAKA, p) - meters).abs() < 0.01);
        }
        assert!(within_radius(DHAKA, offset_north(DHAKA, 399.0), 400.0));
        assert!(!within_radius(DHAKA, offset_north(DHAKA, 401.0), 400.0));
    }
}
