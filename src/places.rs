use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{trace, warn};

use crate::errors::{AppError, AppResult};
use crate::geo::Coordinate;

/// Places API caps `locationBias` circles at this radius.
pub const MAX_BIAS_RADIUS_METERS: f64 = 50_000.0;

const DOG_PARK_TYPE: &str = "dog_park";
const SEARCH_FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.location,places.addressComponents,places.photos,places.websiteUri,places.types,nextPageToken";

/// One search request for a single grid cell.
#[derive(Debug, Clone)]
pub struct PoiQuery {
    pub center: Coordinate,
    pub radius_meters: f64,
    pub category: String,
    pub max_per_page: u32,
    pub page_token: Option<String>,
}

/// A point of interest as reported by the places provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoi {
    pub place_id: String,
    pub name: Option<String>,
    pub formatted_address: Option<String>,
    pub location: Coordinate,
    pub city: Option<String>,
    pub country: Option<String>,
    pub photo_reference: Option<String>,
    pub website_url: Option<String>,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PoiPage {
    pub results: Vec<RawPoi>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait PlaceSearch: Send + Sync {
    async fn search(&self, query: &PoiQuery) -> AppResult<PoiPage>;
}

pub struct HttpPlacesClient {
    http: Client,
    api_base: String,
    api_key: SecretString,
    rate_limiter: RateLimiter,
}

impl HttpPlacesClient {
    pub fn new(http: Client, api_base: impl Into<String>, api_key: SecretString, qps: u32) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            rate_limiter: RateLimiter::new(qps.max(1)),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchTextBody<'a> {
    text_query: &'a str,
    included_type: &'static str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
    location_bias: LocationBias,
}

#[derive(Serialize)]
struct LocationBias {
    circle: BiasCircle,
}

#[derive(Serialize)]
struct BiasCircle {
    center: BiasCenter,
    radius: f64,
}

#[derive(Serialize)]
struct BiasCenter {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchTextResponse {
    #[serde(default)]
    places: Vec<ResponsePlace>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePlace {
    id: Option<String>,
    display_name: Option<ResponseText>,
    formatted_address: Option<String>,
    location: Option<ResponseLocation>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    #[serde(default)]
    photos: Vec<ResponsePhoto>,
    website_uri: Option<String>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Deserialize)]
struct ResponseText {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ResponseLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressComponent {
    long_text: Option<String>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Deserialize)]
struct ResponsePhoto {
    name: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

#[async_trait]
impl PlaceSearch for HttpPlacesClient {
    async fn search(&self, query: &PoiQuery) -> AppResult<PoiPage> {
        let body = SearchTextBody {
            text_query: &query.category,
            included_type: DOG_PARK_TYPE,
            page_size: query.max_per_page.clamp(1, 20),
            page_token: query.page_token.as_deref(),
            location_bias: LocationBias {
                circle: BiasCircle {
                    center: BiasCenter {
                        latitude: query.center.latitude,
                        longitude: query.center.longitude,
                    },
                    radius: query.radius_meters.min(MAX_BIAS_RADIUS_METERS),
                },
            },
        };

        self.rate_limiter.wait().await;
        let response = self
            .http
            .post(format!("{}/places:searchText", self.api_base))
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", SEARCH_FIELD_MASK)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::upstream("places", describe_error(status, &text)));
        }

        let parsed: SearchTextResponse = response.json().await?;
        let mut results = Vec::with_capacity(parsed.places.len());
        for place in parsed.places {
            match into_raw_poi(place) {
                Some(raw) => results.push(raw),
                None => warn!(target: "places", "skipping place without id or location"),
            }
        }
        trace!(
            target: "places",
            center = ?query.center,
            results = results.len(),
            has_next = parsed.next_page_token.is_some(),
            "places page fetched"
        );

        Ok(PoiPage {
            results,
            next_page_token: parsed.next_page_token.filter(|token| !token.is_empty()),
        })
    }
}

fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .map(|error| {
            format!(
                "{}: {}",
                error.status.unwrap_or_default(),
                error.message.unwrap_or_default()
            )
        });
    match detail {
        Some(detail) => format!("HTTP {status} ({detail})"),
        None => format!("HTTP {status}"),
    }
}

fn into_raw_poi(place: ResponsePlace) -> Option<RawPoi> {
    let place_id = place.id.filter(|id| !id.is_empty())?;
    let location = place.location?;
    let location = Coordinate::new(location.latitude?, location.longitude?);

    let mut city = None;
    let mut country = None;
    for component in &place.address_components {
        let has = |kind: &str| component.types.iter().any(|t| t == kind);
        if has("locality") || has("postal_town") {
            city = component.long_text.clone();
        }
        if has("country") {
            country = component.long_text.clone();
        }
    }

    Some(RawPoi {
        place_id,
        name: place.display_name.and_then(|text| text.text),
        formatted_address: place.formatted_address,
        location,
        city,
        country,
        photo_reference: place.photos.into_iter().find_map(|photo| photo.name),
        website_url: place.website_uri,
        types: place.types,
    })
}

/// Enforces a minimum interval between outgoing requests.
struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(qps: u32) -> Self {
        Self {
            min_interval: Duration::from_millis(Self::interval_ms(qps)),
            last_tick: AsyncMutex::new(None),
        }
    }

    fn interval_ms(qps: u32) -> u64 {
        let safe_qps = qps.max(1);
        let interval_ms = (1000_f64 / safe_qps as f64).ceil() as u64;
        interval_ms.max(20)
    }

    async fn wait(&self) {
        let interval = self.min_interval;
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}
