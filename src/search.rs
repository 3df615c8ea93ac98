use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geocoding::Geocoder;
use crate::grid;
use crate::geo::park_key;
use crate::park::{extract, ParkRecord};
use crate::photos::PhotoUploader;
use crate::places::{PlaceSearch, PoiQuery};
use crate::store::{ParkProber, ParkSink};

const DEFAULT_CATEGORY: &str = "dog park";

#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Stored matches needed to skip external discovery.
    pub short_circuit_min: usize,
    pub max_cell_radius_meters: f64,
    /// Smaller radii are rejected before any upstream call.
    pub min_radius_meters: f64,
    pub page_size: u32,
    pub page_delay: Duration,
    pub category: String,
}

impl SearchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            short_circuit_min: config.short_circuit_min_results.max(1),
            max_cell_radius_meters: config.max_cell_radius_meters,
            min_radius_meters: config.min_search_radius_meters,
            page_size: config.places_page_size,
            page_delay: config.page_token_delay(),
            category: DEFAULT_CATEGORY.to_string(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            short_circuit_min: 3,
            max_cell_radius_meters: 50_000.0,
            min_radius_meters: 100.0,
            page_size: 20,
            page_delay: Duration::from_secs(2),
            category: DEFAULT_CATEGORY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub location: String,
    pub radius_meters: f64,
    /// `None` means no cap. Explicit non-positive caps are rejected.
    pub max_results: Option<i64>,
}

impl SearchRequest {
    pub fn new(location: impl Into<String>, radius_meters: f64, max_results: Option<i64>) -> Self {
        Self {
            location: location.into(),
            radius_meters,
            max_results,
        }
    }

    /// Returns the effective result cap.
    fn validate(&self, min_radius_meters: f64) -> AppResult<Option<usize>> {
        if self.location.trim().is_empty() {
            return Err(AppError::InvalidInput("location must not be empty".into()));
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(AppError::InvalidInput(format!(
                "radius must be a positive number of meters, got {}",
                self.radius_meters
            )));
        }
        if self.radius_meters < min_radius_meters {
            return Err(AppError::InvalidInput(format!(
                "radius must be at least {min_radius_meters} m, got {}",
                self.radius_meters
            )));
        }
        match self.max_results {
            None => Ok(None),
            Some(cap) if cap > 0 => Ok(Some(usize::try_from(cap).unwrap_or(usize::MAX))),
            Some(cap) => Err(AppError::InvalidInput(format!(
                "max_result must be positive when given, got {cap}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkSource {
    /// Enough parks were already stored; nothing was searched or written.
    Store,
    Discovery,
}

impl ParkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParkSource::Store => "store",
            ParkSource::Discovery => "discovery",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub cells: usize,
    pub pages: usize,
    pub duplicates: usize,
    pub inserted: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub parks: Vec<ParkRecord>,
    pub source: ParkSource,
    pub stats: SearchStats,
}

/// Drives one park search: geocode, probe the store, and otherwise tile,
/// page, dedupe, extract and persist newly discovered parks.
pub struct ParkSearch {
    geocoder: Arc<dyn Geocoder>,
    places: Arc<dyn PlaceSearch>,
    photos: Arc<dyn PhotoUploader>,
    prober: Arc<dyn ParkProber>,
    sink: Arc<dyn ParkSink>,
    settings: SearchSettings,
}

impl ParkSearch {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        places: Arc<dyn PlaceSearch>,
        photos: Arc<dyn PhotoUploader>,
        prober: Arc<dyn ParkProber>,
        sink: Arc<dyn ParkSink>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            geocoder,
            places,
            photos,
            prober,
            sink,
            settings,
        }
    }

    pub async fn search_parks(&self, request: &SearchRequest) -> AppResult<SearchOutcome> {
        self.search_parks_with_cancel(request, None).await
    }

    /// Like [`ParkSearch::search_parks`], but stops before the next page
    /// request once `cancel_flag` is raised. A cancelled search persists
    /// nothing.
    pub async fn search_parks_with_cancel(
        &self,
        request: &SearchRequest,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> AppResult<SearchOutcome> {
        let cap = request.validate(self.settings.min_radius_meters)?;
        let location = request.location.trim();
        let radius = request.radius_meters;

        let place = self
            .geocoder
            .geocode(location)
            .await?
            .ok_or_else(|| AppError::LocationNotFound(location.to_string()))?;
        let region = place.search_region(radius);
        let center = region.centroid();

        let mut existing = self.prober.find_near(center, radius, None).await?;
        if existing.len() >= self.settings.short_circuit_min {
            if let Some(cap) = cap {
                existing.truncate(cap);
            }
            info!(
                target: "park_search",
                location,
                returned = existing.len(),
                "enough stored parks nearby; skipping discovery"
            );
            return Ok(SearchOutcome {
                parks: existing,
                source: ParkSource::Store,
                stats: SearchStats::default(),
            });
        }

        let cell_radius = radius.min(self.settings.max_cell_radius_meters);
        let cells = grid::tile(&region, cell_radius)?;
        let mut stats = SearchStats {
            cells: cells.len(),
            ..SearchStats::default()
        };
        let city = place.city.as_deref();
        let country = place.country.as_deref();
        let reached_cap = |found: usize| cap.is_some_and(|cap| found >= cap);

        let mut seen: HashSet<String> = HashSet::new();
        let mut discovered: Vec<ParkRecord> = Vec::new();

        'cells: for cell in cells {
            let mut query = PoiQuery {
                center: cell,
                radius_meters: cell_radius,
                category: self.settings.category.clone(),
                max_per_page: self.settings.page_size,
                page_token: None,
            };

            loop {
                if reached_cap(discovered.len()) {
                    break 'cells;
                }
                ensure_not_cancelled(cancel_flag.as_deref())?;
                if query.page_token.is_some() && !self.settings.page_delay.is_zero() {
                    sleep(self.settings.page_delay).await;
                }

                let page = self.places.search(&query).await?;
                stats.pages += 1;

                for raw in &page.results {
                    if reached_cap(discovered.len()) {
                        break;
                    }
                    if raw.place_id.trim().is_empty() {
                        warn!(target: "park_search", "skipping place without an id");
                        continue;
                    }
                    let key = match park_key(raw.location) {
                        Ok(key) => key,
                        Err(err) => {
                            warn!(
                                target: "park_search",
                                place_id = %raw.place_id,
                                error = %err,
                                "skipping place without a usable location"
                            );
                            continue;
                        }
                    };
                    if !seen.insert(key) {
                        stats.duplicates += 1;
                        continue;
                    }
                    match extract(raw, city, country, self.photos.as_ref()).await {
                        Ok(record) => discovered.push(record),
                        Err(err) => warn!(
                            target: "park_search",
                            place_id = %raw.place_id,
                            error = %err,
                            "skipping unusable place"
                        ),
                    }
                }

                match page.next_page_token {
                    Some(token) => query.page_token = Some(token),
                    None => break,
                }
            }
            debug!(target: "park_search", found = discovered.len(), "cell searched");
        }

        ensure_not_cancelled(cancel_flag.as_deref())?;
        let report = self.sink.insert_many(&discovered).await?;
        stats.inserted = report.inserted;
        stats.conflicts = report.conflicts.len();

        info!(
            target: "park_search",
            location,
            cells = stats.cells,
            pages = stats.pages,
            duplicates = stats.duplicates,
            returned = discovered.len(),
            inserted = stats.inserted,
            conflicts = stats.conflicts,
            "park discovery finished"
        );
        Ok(SearchOutcome {
            parks: discovered,
            source: ParkSource::Discovery,
            stats,
        })
    }
}

fn ensure_not_cancelled(flag: Option<&AtomicBool>) -> AppResult<()> {
    if flag.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
        return Err(AppError::Cancelled);
    }
    Ok(())
}
