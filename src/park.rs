use serde::Serialize;
use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::geo::{park_key, Coordinate};
use crate::photos::PhotoUploader;
use crate::places::RawPoi;

pub const DOG_PARK: &str = "dog_park";
const UNNAMED_PARK: &str = "Dog park";

/// Canonical park record. Built once by [`extract`]; the only change allowed
/// afterwards is [`ParkRecord::with_photo_url`], which yields a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParkRecord {
    external_id: String,
    name: String,
    city: Option<String>,
    country: Option<String>,
    geohash: String,
    address: Option<String>,
    location: Coordinate,
    photo_url: Option<String>,
    website_url: Option<String>,
    #[serde(rename = "type")]
    kind: String,
}

pub struct NewPark {
    pub external_id: String,
    pub name: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub location: Coordinate,
    pub website_url: Option<String>,
}

impl ParkRecord {
    pub fn new(park: NewPark) -> AppResult<Self> {
        if park.external_id.trim().is_empty() {
            return Err(AppError::InvalidInput("park without external id".into()));
        }
        let geohash = park_key(park.location)?;
        Ok(Self {
            external_id: park.external_id,
            name: park.name,
            city: park.city,
            country: park.country,
            geohash,
            address: park.address,
            location: park.location,
            photo_url: None,
            website_url: park.website_url,
            kind: DOG_PARK.to_string(),
        })
    }

    /// Rebuilds a record exactly as it was stored.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_stored(
        external_id: String,
        name: String,
        city: Option<String>,
        country: Option<String>,
        geohash: String,
        address: Option<String>,
        location: Coordinate,
        photo_url: Option<String>,
        website_url: Option<String>,
        kind: String,
    ) -> Self {
        Self {
            external_id,
            name,
            city,
            country,
            geohash,
            address,
            location,
            photo_url,
            website_url,
            kind,
        }
    }

    pub fn with_photo_url(self, photo_url: Option<String>) -> Self {
        Self { photo_url, ..self }
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn geohash(&self) -> &str {
        &self.geohash
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn location(&self) -> Coordinate {
        self.location
    }

    pub fn photo_url(&self) -> Option<&str> {
        self.photo_url.as_deref()
    }

    pub fn website_url(&self) -> Option<&str> {
        self.website_url.as_deref()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// Maps a provider result onto the canonical shape, without touching the
/// photo. City and country fall back to the geocoded locality.
pub fn normalize(
    raw: &RawPoi,
    city_fallback: Option<&str>,
    country_fallback: Option<&str>,
) -> AppResult<ParkRecord> {
    let address = non_empty(raw.formatted_address.as_deref());
    let name = non_empty(raw.name.as_deref())
        .or_else(|| address.clone())
        .unwrap_or_else(|| UNNAMED_PARK.to_string());

    ParkRecord::new(NewPark {
        external_id: raw.place_id.clone(),
        name,
        city: non_empty(raw.city.as_deref()).or_else(|| non_empty(city_fallback)),
        country: non_empty(raw.country.as_deref()).or_else(|| non_empty(country_fallback)),
        address,
        location: raw.location,
        website_url: non_empty(raw.website_url.as_deref()),
    })
}

/// Resolves the representative photo. Failures only cost the photo.
pub async fn attach_photo(
    record: ParkRecord,
    raw: &RawPoi,
    uploader: &dyn PhotoUploader,
) -> ParkRecord {
    let Some(photo_ref) = raw.photo_reference.as_deref() else {
        return record;
    };
    match uploader.upload_photo(photo_ref, record.name()).await {
        Ok(url) => record.with_photo_url(url),
        Err(err) => {
            warn!(
                target: "photos",
                external_id = record.external_id(),
                error = %err,
                "photo upload failed; keeping park without photo"
            );
            record
        }
    }
}

pub async fn extract(
    raw: &RawPoi,
    city_fallback: Option<&str>,
    country_fallback: Option<&str>,
    uploader: &dyn PhotoUploader,
) -> AppResult<ParkRecord> {
    let record = normalize(raw, city_fallback, country_fallback)?;
    Ok(attach_photo(record, raw, uploader).await)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
