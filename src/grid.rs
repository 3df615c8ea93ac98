use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::geo::{distance, normalize_longitude, parallel_length, BoundingRegion, Coordinate};

/// Cells are sized so their half-diagonal stays below the search radius,
/// with a small margin for the spherical approximations.
const CELL_SPAN_FACTOR: f64 = std::f64::consts::SQRT_2 * 0.95;

/// Upper bound on the cells one region may be split into.
pub const MAX_CELLS: usize = 10_000;

/// Search cell centres covering `region` so that every point of the region
/// lies within `cell_radius_meters` of at least one centre.
///
/// Row-major order from the south-west corner; the same input always yields
/// the same sequence.
pub fn tile(region: &BoundingRegion, cell_radius_meters: f64) -> AppResult<Vec<Coordinate>> {
    if !cell_radius_meters.is_finite() || cell_radius_meters <= 0.0 {
        return Err(AppError::InvalidInput(format!(
            "cell radius must be positive, got {cell_radius_meters}"
        )));
    }
    region.validate()?;

    let (height, width) = region_extent(region);
    let max_span = cell_radius_meters * CELL_SPAN_FACTOR;
    let too_many = || {
        AppError::InvalidInput(format!(
            "a {cell_radius_meters} m cell radius needs more than {MAX_CELLS} search cells for this region"
        ))
    };
    let lat_steps = step_count(height, max_span).ok_or_else(too_many)?;
    let lng_steps = step_count(width, max_span).ok_or_else(too_many)?;
    match lat_steps.checked_mul(lng_steps) {
        Some(cells) if cells <= MAX_CELLS => {}
        _ => return Err(too_many()),
    }

    let lat_step = region.latitude_span() / lat_steps as f64;
    let lng_step = region.longitude_span() / lng_steps as f64;
    let sw = region.southwest;

    let mut centers = Vec::with_capacity(lat_steps * lng_steps);
    for i in 0..lat_steps {
        let lat = sw.latitude + i as f64 * lat_step + lat_step / 2.0;
        for j in 0..lng_steps {
            let lng = sw.longitude + j as f64 * lng_step + lng_step / 2.0;
            centers.push(Coordinate::new(lat, normalize_longitude(lng)));
        }
    }

    debug!(
        target: "park_search",
        cell_radius_meters,
        height_m = height.round(),
        width_m = width.round(),
        cells = centers.len(),
        "tiled search region"
    );
    Ok(centers)
}

/// Height along the western meridian and width along the widest parallel.
fn region_extent(region: &BoundingRegion) -> (f64, f64) {
    let sw = region.southwest;
    let ne = region.northeast;
    let height = distance(sw, Coordinate::new(ne.latitude, sw.longitude));

    let widest_lat = if sw.latitude <= 0.0 && ne.latitude >= 0.0 {
        0.0
    } else if sw.latitude > 0.0 {
        sw.latitude
    } else {
        ne.latitude
    };
    (height, parallel_length(widest_lat, region.longitude_span()))
}

/// `None` when the extent cannot be covered by a sane number of steps.
fn step_count(extent_meters: f64, max_span_meters: f64) -> Option<usize> {
    let steps = (extent_meters / max_span_meters).ceil();
    if !steps.is_finite() || steps > MAX_CELLS as f64 {
        return None;
    }
    Some((steps as usize).max(1))
}
