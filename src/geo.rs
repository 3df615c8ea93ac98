use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Mean earth radius used by every distance computation in the crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Geohash length used as the park identity key.
pub const GEOHASH_PRECISION: usize = 9;

const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub northeast: Coordinate,
    pub southwest: Coordinate,
}

impl BoundingRegion {
    pub fn new(northeast: Coordinate, southwest: Coordinate) -> Self {
        Self {
            northeast,
            southwest,
        }
    }

    /// Square window of half-side `radius_meters` centred on `center`.
    ///
    /// Longitudes wrap across the antimeridian; near the poles the window
    /// widens to the whole parallel.
    pub fn around(center: Coordinate, radius_meters: f64) -> Self {
        let lat_delta = radius_meters / METERS_PER_DEGREE;
        let north = (center.latitude + lat_delta).min(90.0);
        let south = (center.latitude - lat_delta).max(-90.0);
        let widest = north.abs().max(south.abs());
        let cos = widest.to_radians().cos();
        let lng_delta = if cos < 1e-6 {
            180.0
        } else {
            radius_meters / (METERS_PER_DEGREE * cos)
        };
        let (east, west) = if lng_delta >= 180.0 {
            (180.0, -180.0)
        } else {
            (
                normalize_longitude(center.longitude + lng_delta),
                normalize_longitude(center.longitude - lng_delta),
            )
        };
        Self {
            northeast: Coordinate::new(north, east),
            southwest: Coordinate::new(south, west),
        }
    }

    /// Eastward longitude span in degrees, positive even across the antimeridian.
    pub fn longitude_span(&self) -> f64 {
        let span = self.northeast.longitude - self.southwest.longitude;
        if span < 0.0 {
            span + 360.0
        } else {
            span
        }
    }

    pub fn latitude_span(&self) -> f64 {
        self.northeast.latitude - self.southwest.latitude
    }

    pub fn centroid(&self) -> Coordinate {
        Coordinate::new(
            self.southwest.latitude + self.latitude_span() / 2.0,
            normalize_longitude(self.southwest.longitude + self.longitude_span() / 2.0),
        )
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        if point.latitude < self.southwest.latitude || point.latitude > self.northeast.latitude {
            return false;
        }
        let offset = point.longitude - self.southwest.longitude;
        let offset = if offset < 0.0 { offset + 360.0 } else { offset };
        offset <= self.longitude_span()
    }

    pub fn validate(&self) -> AppResult<()> {
        if !self.northeast.is_valid() || !self.southwest.is_valid() {
            return Err(AppError::InvalidInput(format!(
                "bounding region has out-of-range corners: {self:?}"
            )));
        }
        if self.northeast.latitude < self.southwest.latitude {
            return Err(AppError::InvalidInput(
                "bounding region northeast corner lies south of its southwest corner".into(),
            ));
        }
        Ok(())
    }
}

/// Wraps a longitude into `[-180, 180]`.
pub fn normalize_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let wrapped = (longitude + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && longitude > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Length in meters of `longitude_span` degrees along the parallel at
/// `latitude`. Unlike [`distance`] between the two ends, this follows the
/// parallel instead of the shorter great circle.
pub fn parallel_length(latitude: f64, longitude_span: f64) -> f64 {
    EARTH_RADIUS_METERS * latitude.to_radians().cos().max(0.0) * longitude_span.abs().to_radians()
}

/// Great-circle distance in meters (haversine, spherical earth).
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

pub fn geohash(coordinate: Coordinate, precision: usize) -> AppResult<String> {
    if !coordinate.is_valid() {
        return Err(AppError::InvalidInput(format!(
            "cannot geohash coordinate {coordinate:?}"
        )));
    }
    geohash::encode(
        geohash::Coord {
            x: coordinate.longitude,
            y: coordinate.latitude,
        },
        precision,
    )
    .map_err(|err| AppError::InvalidInput(format!("geohash encoding failed: {err}")))
}

/// Identity key for a park at the system-wide precision.
pub fn park_key(coordinate: Coordinate) -> AppResult<String> {
    geohash(coordinate, GEOHASH_PRECISION)
}
