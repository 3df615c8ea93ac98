use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_GEOCODING_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DEFAULT_PLACES_API_BASE: &str = "https://places.googleapis.com/v1";
const MAX_PLACES_PAGE_SIZE: u32 = 20;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub database_file_name: String,
    pub google_maps_api_key: Option<SecretString>,
    pub geocoding_endpoint: String,
    pub places_api_base: String,
    pub places_rate_limit_qps: u32,
    pub places_page_size: u32,
    pub page_token_delay_ms: u64,
    pub short_circuit_min_results: usize,
    pub max_cell_radius_meters: f64,
    pub min_search_radius_meters: f64,
    pub default_search_radius_meters: f64,
    pub default_max_results: i64,
    pub photo_max_width_px: u32,
    pub photo_container_url: Option<String>,
    pub photo_container_sas: Option<SecretString>,
    pub http_timeout_secs: u64,
    pub telemetry_enabled: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub port: u16,
    pub database_file_name: String,
    pub places_rate_limit_qps: u32,
    pub places_page_size: u32,
    pub page_token_delay_ms: u64,
    pub short_circuit_min_results: usize,
    pub max_cell_radius_meters: f64,
    pub min_search_radius_meters: f64,
    pub default_search_radius_meters: f64,
    pub default_max_results: i64,
    pub telemetry_enabled: bool,
    pub has_google_maps_key: bool,
    pub has_photo_container: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            port: parse_u16("PORT", 8080),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".dogy")),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "dogy-parks.db".to_string()),
            google_maps_api_key: parse_secret("GOOGLE_MAPS_API_KEY"),
            geocoding_endpoint: env::var("GEOCODING_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_GEOCODING_ENDPOINT.to_string()),
            places_api_base: env::var("PLACES_API_BASE")
                .unwrap_or_else(|_| DEFAULT_PLACES_API_BASE.to_string()),
            places_rate_limit_qps: parse_u32("PLACES_RATE_LIMIT_QPS", 3).max(1),
            places_page_size: parse_u32("PLACES_PAGE_SIZE", MAX_PLACES_PAGE_SIZE)
                .clamp(1, MAX_PLACES_PAGE_SIZE),
            page_token_delay_ms: parse_u64("PAGE_TOKEN_DELAY_MS", 2_000),
            short_circuit_min_results: parse_usize("SHORT_CIRCUIT_MIN_RESULTS", 3),
            max_cell_radius_meters: parse_f64("MAX_CELL_RADIUS_METERS", 50_000.0),
            min_search_radius_meters: parse_f64("MIN_SEARCH_RADIUS_METERS", 100.0),
            default_search_radius_meters: parse_f64("DEFAULT_SEARCH_RADIUS_METERS", 10_000.0),
            default_max_results: parse_i64("DEFAULT_MAX_RESULTS", 20),
            photo_max_width_px: parse_u32("PHOTO_MAX_WIDTH_PX", 400),
            photo_container_url: env::var("PHOTO_CONTAINER_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            photo_container_sas: parse_secret("PHOTO_CONTAINER_SAS"),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", 10),
            telemetry_enabled: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25).max(1),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            port: self.port,
            database_file_name: self.database_file_name.clone(),
            places_rate_limit_qps: self.places_rate_limit_qps,
            places_page_size: self.places_page_size,
            page_token_delay_ms: self.page_token_delay_ms,
            short_circuit_min_results: self.short_circuit_min_results,
            max_cell_radius_meters: self.max_cell_radius_meters,
            min_search_radius_meters: self.min_search_radius_meters,
            default_search_radius_meters: self.default_search_radius_meters,
            default_max_results: self.default_max_results,
            telemetry_enabled: self.telemetry_enabled,
            has_google_maps_key: self.google_maps_api_key.is_some(),
            has_photo_container: self.photo_container_url.is_some(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file_name)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn page_token_delay(&self) -> Duration {
        Duration::from_millis(self.page_token_delay_ms)
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::new(v.into()))
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_u16(key: &str, default: u16) -> u16 {
    parse_number(key, default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    parse_number(key, default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    parse_number(key, default)
}

fn parse_i64(key: &str, default: i64) -> i64 {
    parse_number(key, default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    parse_number(key, default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    let value: f64 = parse_number(key, default);
    if value.is_finite() && value > 0.0 {
        value
    } else {
        default
    }
}
