pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Distance grand-cercle (haversine) en mètres
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Distance euclidienne brute en degrés (lat/lon mélangés, approximation grossière)
pub fn degree_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    ((lat2 - lat1).powi(2) + (lon2 - lon1).powi(2)).sqrt()
}
