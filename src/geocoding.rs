use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::geo::{BoundingRegion, Coordinate};

/// A free-text location resolved to coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodedPlace {
    pub center: Coordinate,
    pub bounds: Option<BoundingRegion>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub formatted_address: Option<String>,
}

impl GeocodedPlace {
    /// Region to tile: the provider bounds, or a square of half-side
    /// `radius_meters` around the centre when the provider gave none.
    pub fn search_region(&self, radius_meters: f64) -> BoundingRegion {
        self.bounds
            .unwrap_or_else(|| BoundingRegion::around(self.center, radius_meters))
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the provider has no candidate for `query`.
    async fn geocode(&self, query: &str) -> AppResult<Option<GeocodedPlace>>;
}

pub struct GoogleGeocoder {
    http: Client,
    endpoint: String,
    api_key: SecretString,
}

impl GoogleGeocoder {
    pub fn new(http: Client, endpoint: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    formatted_address: Option<String>,
}

#[derive(Deserialize)]
struct Geometry {
    location: LatLng,
    bounds: Option<Bounds>,
    viewport: Option<Bounds>,
}

#[derive(Deserialize, Clone, Copy)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize, Clone, Copy)]
struct Bounds {
    northeast: LatLng,
    southwest: LatLng,
}

#[derive(Deserialize)]
struct AddressComponent {
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl From<LatLng> for Coordinate {
    fn from(value: LatLng) -> Self {
        Coordinate::new(value.lat, value.lng)
    }
}

impl From<Bounds> for BoundingRegion {
    fn from(value: Bounds) -> Self {
        BoundingRegion::new(value.northeast.into(), value.southwest.into())
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, query: &str) -> AppResult<Option<GeocodedPlace>> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("address", query), ("key", self.api_key.expose_secret())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::upstream("geocoding", format!("HTTP {status}")));
        }

        let parsed: GeocodeResponse = response.json().await?;
        match parsed.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => {
                debug!(target: "geocoding", query, "no geocoding candidates");
                return Ok(None);
            }
            other => {
                warn!(target: "geocoding", status = other, "geocoding rejected request");
                return Err(AppError::upstream(
                    "geocoding",
                    format!(
                        "{other}: {}",
                        parsed.error_message.unwrap_or_default()
                    ),
                ));
            }
        }

        let Some(result) = parsed.results.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(into_place(result)))
    }
}

fn into_place(result: GeocodeResult) -> GeocodedPlace {
    let mut city = None;
    let mut country = None;
    for component in &result.address_components {
        let has = |kind: &str| component.types.iter().any(|t| t == kind);
        if has("locality") || has("postal_town") {
            city = Some(component.long_name.clone());
        }
        if has("country") {
            country = Some(component.long_name.clone());
        }
    }

    let bounds = result
        .geometry
        .bounds
        .or(result.geometry.viewport)
        .map(BoundingRegion::from)
        .filter(|region| region.validate().is_ok());

    GeocodedPlace {
        center: result.geometry.location.into(),
        bounds,
        city,
        country,
        formatted_address: result.formatted_address,
    }
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;

    fn geocoder(server: &Server) -> GoogleGeocoder {
        GoogleGeocoder::new(
            Client::new(),
            server.url_str("/maps/api/geocode/json"),
            SecretString::new("geo-key".to_string().into()),
        )
    }

    #[tokio::test]
    async fn resolves_bounds_city_and_country() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of!(
                request::method("GET"),
                request::path("/maps/api/geocode/json"),
                request::query(url_decoded(contains(("address", "Stockholm, Sweden")))),
            ))
            .respond_with(json_encoded(json!({
                "status": "OK",
                "results": [{
                    "formatted_address": "Stockholm, Sweden",
                    "address_components": [
                        { "long_name": "Stockholm", "types": ["locality", "political"] },
                        { "long_name": "Sweden", "types": ["country", "political"] }
                    ],
                    "geometry": {
                        "location": { "lat": 59.3293235, "lng": 18.0685808 },
                        "bounds": {
                            "northeast": { "lat": 59.4344799, "lng": 18.1983038 },
                            "southwest": { "lat": 59.2280691, "lng": 17.7606878 }
                        },
                        "viewport": {
                            "northeast": { "lat": 59.5, "lng": 18.3 },
                            "southwest": { "lat": 59.1, "lng": 17.6 }
                        }
                    }
                }]
            }))),
        );

        let place = geocoder(&server)
            .geocode("Stockholm, Sweden")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(place.city.as_deref(), Some("Stockholm"));
        assert_eq!(place.country.as_deref(), Some("Sweden"));
        let bounds = place.bounds.unwrap();
        assert_eq!(bounds.northeast.latitude, 59.4344799);
        assert_eq!(bounds.southwest.longitude, 17.7606878);
    }

    #[tokio::test]
    async fn falls_back_to_viewport_and_reports_missing_places() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::query(url_decoded(contains((
                "address",
                "Kungsholmen",
            )))))
            .respond_with(json_encoded(json!({
                "status": "OK",
                "results": [{
                    "address_components": [],
                    "geometry": {
                        "location": { "lat": 59.33, "lng": 18.03 },
                        "viewport": {
                            "northeast": { "lat": 59.34, "lng": 18.05 },
                            "southwest": { "lat": 59.32, "lng": 18.01 }
                        }
                    }
                }]
            }))),
        );
        server.expect(
            Expectation::matching(request::query(url_decoded(contains(("address", "Atlantis")))))
                .respond_with(json_encoded(json!({ "status": "ZERO_RESULTS", "results": [] }))),
        );

        let geocoder = geocoder(&server);
        let place = geocoder.geocode("Kungsholmen").await.unwrap().unwrap();
        assert_eq!(place.bounds.unwrap().northeast.latitude, 59.34);
        assert!(place.city.is_none());
        assert!(geocoder.geocode("Atlantis").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_requests_are_upstream_failures() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::path("/maps/api/geocode/json")).respond_with(
                json_encoded(json!({
                    "status": "REQUEST_DENIED",
                    "error_message": "The provided API key is invalid."
                })),
            ),
        );
        let err = geocoder(&server).geocode("Oslo").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream { service: "geocoding", .. }));

        let server = Server::run();
        server.expect(
            Expectation::matching(request::path("/maps/api/geocode/json"))
                .respond_with(status_code(500)),
        );
        let err = geocoder(&server).geocode("Oslo").await.unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
    }

    #[test]
    fn search_region_falls_back_to_radius_square() {
        let place = GeocodedPlace {
            center: Coordinate::new(59.33, 18.06),
            bounds: None,
            city: None,
            country: None,
            formatted_address: None,
        };
        let region = place.search_region(2_000.0);
        assert!(region.contains(place.center));
        assert!(region.latitude_span() > 0.03 && region.latitude_span() < 0.04);
    }
}
