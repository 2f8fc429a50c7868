use crate::model::session::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlam = (b.lng - a.lng).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlam / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn is_inside_geofence(user: GeoPoint, centre: GeoPoint, radius_m: f64) -> bool {
    haversine_km(user, centre) * 1000.0 <= radius_m
}

pub fn is_valid_point(p: GeoPoint) -> bool {
    p.lat.is_finite() && p.lng.is_finite() && (-90.0..=90.0).contains(&p.lat) && (-180.0..=180.0).contains(&p.lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMPUS: GeoPoint = GeoPoint { lat: 12.9716, lng: 77.5946 };

    #[test]
    fn same_point_is_zero() {
        assert!(haversine_km(CAMPUS, CAMPUS).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let north = GeoPoint { lat: CAMPUS.lat + 1.0, lng: CAMPUS.lng };
        let d = haversine_km(CAMPUS, north);
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn geofence_boundary() {
        // ~55.6 m north
        let near = GeoPoint { lat: CAMPUS.lat + 0.0005, lng: CAMPUS.lng };
        assert!(is_inside_geofence(near, CAMPUS, 100.0));
        assert!(!is_inside_geofence(near, CAMPUS, 50.0));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(is_valid_point(CAMPUS));
        assert!(!is_valid_point(GeoPoint { lat: 91.0, lng: 0.0 }));
        assert!(!is_valid_point(GeoPoint { lat: f64::NAN, lng: 0.0 }));
    }
}
