//! Great-circle helpers for the nearby-cards query.

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance in metres between two `(longitude, latitude)` points.
pub fn distance_m(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Latitude/longitude window that contains every point within `radius_m`
/// of the centre. Used as an index-friendly prefilter before the exact
/// distance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    /// `None` when the window wraps the antimeridian or touches a pole;
    /// longitude is then left unfiltered.
    pub lng_range: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn around(lng: f64, lat: f64, radius_m: f64) -> Self {
        let d_lat = (radius_m / EARTH_RADIUS_M).to_degrees();
        let min_lat = (lat - d_lat).max(-90.0);
        let max_lat = (lat + d_lat).min(90.0);

        // East-west half-width of a spherical cap: asin(sin(r/R) / cos(lat)).
        let sin_r = (radius_m / EARTH_RADIUS_M).sin();
        let cos_lat = lat.to_radians().cos();
        let lng_range = if min_lat <= -90.0 || max_lat >= 90.0 || sin_r >= cos_lat {
            None
        } else {
            let d_lng = (sin_r / cos_lat).asin().to_degrees();
            let (lo, hi) = (lng - d_lng, lng + d_lng);
            if lo < -180.0 || hi > 180.0 { None } else { Some((lo, hi)) }
        };

        Self { min_lat, max_lat, lng_range }
    }
}

pub fn valid_coordinates(lng: f64, lat: f64) -> bool {
    lng.is_finite() && lat.is_finite() && (-180.0..=180.0).contains(&lng) && (-90.0..=90.0).contains(&lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        assert!(distance_m(34.78, 32.08, 34.78, 32.08).abs() < 1e-6);
    }

    #[test]
    fn tel_aviv_to_jerusalem() {
        // Roughly 54 km as the crow flies.
        let d = distance_m(34.7818, 32.0853, 35.2137, 31.7683);
        assert!((50_000.0..58_000.0).contains(&d), "got {}", d);
    }

    #[test]
    fn bounding_box_contains_radius() {
        let bbox = BoundingBox::around(34.78, 32.08, 1000.0);
        assert!(bbox.min_lat < 32.08 && bbox.max_lat > 32.08);
        let (lo, hi) = bbox.lng_range.unwrap();
        assert!(lo < 34.78 && hi > 34.78);
        // A point 900 m north must fall inside the window.
        let north = 32.08 + (900.0 / EARTH_RADIUS_M).to_degrees();
        assert!(north < bbox.max_lat);
    }

    #[test]
    fn bounding_box_holds_wide_circles_at_high_latitude() {
        // ~997 km from the centre, east of a flat-projection window.
        let d = distance_m(0.0, 60.0, 18.1, 62.0);
        assert!(d < 1_000_000.0, "got {}", d);

        let bbox = BoundingBox::around(0.0, 60.0, 1_000_000.0);
        let (lo, hi) = bbox.lng_range.unwrap();
        assert!(lo < -18.1 && hi > 18.1, "window ({}, {})", lo, hi);
    }

    #[test]
    fn bounding_box_skips_longitude_when_cap_reaches_pole() {
        let bbox = BoundingBox::around(10.0, 80.0, 1_200_000.0);
        assert!(bbox.lng_range.is_none());
    }

    #[test]
    fn bounding_box_near_antimeridian_skips_longitude() {
        let bbox = BoundingBox::around(179.99, 0.0, 10_000.0);
        assert!(bbox.lng_range.is_none());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(valid_coordinates(34.78, 32.08));
        assert!(!valid_coordinates(200.0, 32.08));
        assert!(!valid_coordinates(34.78, f64::NAN));
    }
}
