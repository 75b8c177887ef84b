//! Coordinate and geometry helpers shared by the array detector, the tremor
//! locator and the swarm clusterer.
//!
//! - ellipsoidal distance/azimuth between two stations (Vincenty inverse),
//! - great-circle distance for volcano proximity,
//! - a local planar frame about an array centre,
//! - pairwise interstation tables for a small array,
//! - WGS84 → UTM projection (Snyder 1987, USGS Prof. Paper 1395).

use crate::model::StationCoordinates;

// ── WGS84 ellipsoid constants ────────────────────────────────────────────

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const B: f64 = A * (1.0 - F);
const E2: f64 = 2.0 * F - F * F;
const E_PRIME2: f64 = E2 / (1.0 - E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Earth radius used for the local planar frame, km.
pub const PLANAR_EARTH_RADIUS_KM: f64 = 6372.7976;

const MEAN_EARTH_RADIUS_KM: f64 = 6371.0;

// ── Distance and azimuth ─────────────────────────────────────────────────

/// Result of the inverse geodesic problem between two points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodesicInverse {
    pub distance_m: f64,
    /// Azimuth at point 1 towards point 2, degrees from north in [0, 360).
    pub azimuth_deg: f64,
    /// Azimuth at point 2 towards point 1, degrees from north in [0, 360).
    pub back_azimuth_deg: f64,
}

/// Wraps an angle in degrees into [0, 360).
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Signed smallest difference `a - b` in degrees, in [-180, 180).
pub fn angular_difference(a: f64, b: f64) -> f64 {
    (a - b + 180.0).rem_euclid(360.0) - 180.0
}

/// Distance and azimuths between two WGS84 points.
///
/// Solved with Vincenty's inverse formula; coincident points give zero
/// distance and azimuth. Nearly antipodal pairs, where the iteration does not
/// converge, fall back to the spherical solution.
pub fn gps2dist_azimuth(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> GeodesicInverse {
    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..200 {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return GeodesicInverse {
                distance_m: 0.0,
                azimuth_deg: 0.0,
                back_azimuth_deg: 0.0,
            };
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos2_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sigma_m = if cos2_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos2_alpha
        } else {
            0.0 // equatorial line
        };
        let c = F / 16.0 * cos2_alpha * (4.0 + F * (4.0 - 3.0 * cos2_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        if (lambda - previous).abs() < 1e-12 {
            let u_sq = cos2_alpha * (A * A - B * B) / (B * B);
            let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                                * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
            let distance_m = B * big_a * (sigma - delta_sigma);

            let (sin_lambda, cos_lambda) = lambda.sin_cos();
            let alpha1 = (cos_u2 * sin_lambda).atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda);
            let alpha2 = (cos_u1 * sin_lambda).atan2(-sin_u1 * cos_u2 + cos_u1 * sin_u2 * cos_lambda);
            return GeodesicInverse {
                distance_m,
                azimuth_deg: wrap_degrees(alpha1.to_degrees()),
                back_azimuth_deg: wrap_degrees(alpha2.to_degrees() + 180.0),
            };
        }
    }

    spherical_inverse(lat1, lon1, lat2, lon2)
}

fn spherical_inverse(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> GeodesicInverse {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_lon = (lon2 - lon1).to_radians();
    let azimuth = |p1: f64, p2: f64, dl: f64| {
        let y = dl.sin() * p2.cos();
        let x = p1.cos() * p2.sin() - p1.sin() * p2.cos() * dl.cos();
        wrap_degrees(y.atan2(x).to_degrees())
    };
    GeodesicInverse {
        distance_m: haversine_km(lat1, lon1, lat2, lon2) * 1000.0,
        azimuth_deg: azimuth(phi1, phi2, d_lon),
        back_azimuth_deg: azimuth(phi2, phi1, -d_lon),
    }
}

/// Haversine great-circle distance in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1.is_nan() || lon1.is_nan() || lat2.is_nan() || lon2.is_nan() {
        return f64::INFINITY;
    }
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

// ── Local planar frame ───────────────────────────────────────────────────

/// Projects positions onto a plane tangent at their mean position.
///
/// Returns `(north_km, east_km)` per point, plus the `(lat, lon)` centre.
pub fn local_planar(coords: &[StationCoordinates]) -> (Vec<(f64, f64)>, (f64, f64)) {
    if coords.is_empty() {
        return (Vec::new(), (0.0, 0.0));
    }
    let n = coords.len() as f64;
    let lat0 = coords.iter().map(|c| c.latitude).sum::<f64>() / n;
    let lon0 = coords.iter().map(|c| c.longitude).sum::<f64>() / n;
    let cos_lat0 = lat0.to_radians().cos();
    let yx = coords
        .iter()
        .map(|c| {
            (
                PLANAR_EARTH_RADIUS_KM * (c.latitude - lat0).to_radians(),
                PLANAR_EARTH_RADIUS_KM * (c.longitude - lon0).to_radians() * cos_lat0,
            )
        })
        .collect();
    (yx, (lat0, lon0))
}

/// Interstation geometry of a small array.
#[derive(Debug, Clone)]
pub struct ArrayGeometry {
    /// Mean `(lat, lon)` of the elements.
    pub center: (f64, f64),
    /// `(north_km, east_km)` of each element about the centre.
    pub positions: Vec<(f64, f64)>,
    distance_km: Vec<Vec<f64>>,
    azimuth_deg: Vec<Vec<f64>>,
}

impl ArrayGeometry {
    pub fn from_coordinates(coords: &[StationCoordinates]) -> Self {
        let n = coords.len();
        let (positions, center) = local_planar(coords);
        let mut distance_km = vec![vec![0.0; n]; n];
        let mut azimuth_deg = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let g = gps2dist_azimuth(
                    coords[i].latitude,
                    coords[i].longitude,
                    coords[j].latitude,
                    coords[j].longitude,
                );
                distance_km[i][j] = g.distance_m / 1000.0;
                distance_km[j][i] = g.distance_m / 1000.0;
                azimuth_deg[i][j] = g.azimuth_deg;
                azimuth_deg[j][i] = g.back_azimuth_deg;
            }
        }
        ArrayGeometry {
            center,
            positions,
            distance_km,
            azimuth_deg,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn distance_km(&self, i: usize, j: usize) -> f64 {
        self.distance_km[i][j]
    }

    /// Azimuth from element `i` towards element `j`.
    pub fn azimuth_deg(&self, i: usize, j: usize) -> f64 {
        self.azimuth_deg[i][j]
    }

    /// `(north_km, east_km)` offset from element `i` to element `j`.
    pub fn offset_km(&self, i: usize, j: usize) -> (f64, f64) {
        let d = self.distance_km(i, j);
        let az = self.azimuth_deg(i, j).to_radians();
        (d * az.cos(), d * az.sin())
    }

    /// Largest interstation distance.
    pub fn aperture_km(&self) -> f64 {
        self.distance_km
            .iter()
            .flat_map(|row| row.iter().copied())
            .fold(0.0, f64::max)
    }
}

// ── UTM ──────────────────────────────────────────────────────────────────

/// UTM zone number, including the Norway and Svalbard exceptions.
pub fn utm_zone_number(lat: f64, lon: f64) -> u32 {
    if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
        return 32;
    }
    if (72.0..=84.0).contains(&lat) && lon >= 0.0 {
        if lon < 9.0 {
            return 31;
        } else if lon < 21.0 {
            return 33;
        } else if lon < 33.0 {
            return 35;
        } else if lon < 42.0 {
            return 37;
        }
    }
    let lon = if lon == 180.0 { -180.0 } else { lon };
    (((lon + 180.0) / 6.0).floor() as u32 % 60) + 1
}

/// UTM latitude band letter, `None` outside 80°S..84°N.
pub fn utm_zone_letter(lat: f64) -> Option<char> {
    const LETTERS: &[u8] = b"CDEFGHJKLMNPQRSTUVWXX";
    if !(-80.0..=84.0).contains(&lat) {
        return None;
    }
    let idx = ((lat + 80.0) / 8.0).floor() as usize;
    Some(LETTERS[idx.min(LETTERS.len() - 1)] as char)
}

/// Projects a WGS84 position into a forced UTM zone, `(easting, northing)`
/// in metres. Letters `N` and above are northern hemisphere.
pub fn to_utm(lat_deg: f64, lon_deg: f64, zone: u32, letter: char) -> (f64, f64) {
    let north = letter >= 'N';
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians();

    let (sin_lat, cos_lat) = lat.sin_cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a_coeff = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a_coeff * a_coeff;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    let easting = K0
        * n
        * (a_coeff
            + (1.0 - t + c) * a2 * a_coeff / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
        + FALSE_EASTING;

    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    if north {
        (easting, northing)
    } else {
        (easting, northing + FALSE_NORTHING_SOUTH)
    }
}

fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;
    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

// ── Tests ────────────────────────────────────────────────────────────────
