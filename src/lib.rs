pub mod api;
pub mod config;
pub mod errors;
pub mod geo;
pub mod geocoding;
pub mod grid;
pub mod park;
pub mod photos;
pub mod places;
pub mod search;
pub mod secrets;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api::HealthReport;
use crate::geocoding::GoogleGeocoder;
use crate::photos::{BlobPhotoUploader, DisabledPhotoUploader, PhotoUploader};
use crate::places::HttpPlacesClient;
use crate::secrets::{SecretVault, MAPS_KEY_ALIAS, PHOTO_SAS_ALIAS};

pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::geo::{BoundingRegion, Coordinate};
pub use crate::park::ParkRecord;
pub use crate::search::{ParkSearch, ParkSource, SearchOutcome, SearchRequest, SearchSettings};
pub use crate::store::{InsertReport, ParkStore};
pub use crate::telemetry::TelemetryClient;

const VAULT_SERVICE_NAME: &str = "DogyParks";

pub struct AppState {
    config: AppConfig,
    store: ParkStore,
    search: ParkSearch,
    telemetry: TelemetryClient,
}

impl AppState {
    /// Wires the Google clients, the park store and the telemetry journal
    /// from `config`. Secrets missing from the environment are looked up in
    /// the OS keychain.
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        let vault = SecretVault::new(VAULT_SERVICE_NAME);
        let (maps_key, key_source) =
            vault.require(MAPS_KEY_ALIAS, config.google_maps_api_key.as_ref())?;

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("dogy-parks/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let store = ParkStore::open(config.database_path())?;
        let telemetry = TelemetryClient::new(&config.data_dir, &config)?;

        let photos: Arc<dyn PhotoUploader> = match &config.photo_container_url {
            Some(container_url) => {
                let sas = vault
                    .resolve(PHOTO_SAS_ALIAS, config.photo_container_sas.as_ref())?
                    .map(|(secret, _)| secret);
                Arc::new(BlobPhotoUploader::new(
                    http.clone(),
                    &config.places_api_base,
                    maps_key.clone(),
                    container_url,
                    sas,
                    config.photo_max_width_px,
                ))
            }
            None => Arc::new(DisabledPhotoUploader),
        };
        let geocoder = Arc::new(GoogleGeocoder::new(
            http.clone(),
            &config.geocoding_endpoint,
            maps_key.clone(),
        ));
        let places = Arc::new(HttpPlacesClient::new(
            http,
            &config.places_api_base,
            maps_key,
            config.places_rate_limit_qps,
        ));
        let store_handle = Arc::new(store.clone());
        let search = ParkSearch::new(
            geocoder,
            places,
            photos,
            store_handle.clone(),
            store_handle,
            SearchSettings::from_config(&config),
        );

        if let Err(err) = telemetry.record(
            "app_start",
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "maps_key_source": key_source.as_str(),
                "photos_enabled": config.photo_container_url.is_some(),
            }),
        ) {
            warn!(?err, "failed to queue telemetry bootstrap event");
        }

        Ok(Self {
            config,
            store,
            search,
            telemetry,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn search(&self) -> &ParkSearch {
        &self.search
    }

    pub fn store(&self) -> &ParkStore {
        &self.store
    }

    pub fn telemetry(&self) -> &TelemetryClient {
        &self.telemetry
    }

    pub fn health(&self) -> AppResult<HealthReport> {
        Ok(HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            database_path: self.store.path().to_string_lossy().to_string(),
            park_count: self.store.count()?,
            telemetry_buffer_path: self.telemetry.buffer_path().to_string_lossy().to_string(),
            telemetry_queue_depth: self.telemetry.queue_depth(),
            config: self.config.public_profile(),
        })
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,dogy_parks=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    let config = AppConfig::from_env();
    let port = config.port;
    let state = Arc::new(AppState::initialize(config)?);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(address = %listener.local_addr()?, "dog park search listening");
    axum::serve(listener, api::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(err) = state.telemetry().flush() {
        warn!(?err, "failed to flush telemetry queue on shutdown");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
    }
}
