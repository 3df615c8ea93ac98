use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::AppResult;
use crate::geo::{distance, BoundingRegion, Coordinate};
use crate::park::ParkRecord;

/// Looks up already known parks around a point.
#[async_trait]
pub trait ParkProber: Send + Sync {
    /// Nearest first, at most `limit` records when a limit is given.
    async fn find_near(
        &self,
        center: Coordinate,
        radius_meters: f64,
        limit: Option<usize>,
    ) -> AppResult<Vec<ParkRecord>>;
}

/// Durable sink for newly discovered parks.
#[async_trait]
pub trait ParkSink: Send + Sync {
    /// Writes the batch atomically. Records that collide with an existing
    /// external id or geohash are skipped and listed in the report; any
    /// other failure leaves the store untouched.
    async fn insert_many(&self, records: &[ParkRecord]) -> AppResult<InsertReport>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub inserted: usize,
    /// External ids of the records that were already stored.
    pub conflicts: Vec<String>,
}

#[derive(Clone)]
pub struct ParkStore {
    connection: Arc<Mutex<Connection>>,
    path: PathBuf,
}

const PARK_COLUMNS: &str =
    "external_id, name, city, country, geohash, address, lat, lng, photo_url, website_url, type";

impl ParkStore {
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let connection = Connection::open_with_flags(path, flags)?;
        connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        connection.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&connection)?;
        info!(target: "park_store", path = %path.display(), "park store ready");

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> AppResult<u64> {
        let conn = self.connection.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM parks", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn find_by_geohash(&self, geohash: &str) -> AppResult<Option<ParkRecord>> {
        let conn = self.connection.lock();
        let sql = format!("SELECT {PARK_COLUMNS} FROM parks WHERE geohash = ?1");
        let record = conn
            .query_row(&sql, [geohash], park_from_row)
            .optional()?;
        Ok(record)
    }

    pub fn parks_near(
        &self,
        center: Coordinate,
        radius_meters: f64,
        limit: Option<usize>,
    ) -> AppResult<Vec<ParkRecord>> {
        if !center.is_valid() || !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Ok(Vec::new());
        }
        let window = BoundingRegion::around(center, radius_meters);
        let lng_clause = if window.southwest.longitude > window.northeast.longitude {
            "(lng >= ?3 OR lng <= ?4)"
        } else {
            "lng BETWEEN ?3 AND ?4"
        };
        let conn = self.connection.lock();
        let sql = format!(
            "SELECT {PARK_COLUMNS} FROM parks
            WHERE lat BETWEEN ?1 AND ?2 AND {lng_clause}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                window.southwest.latitude,
                window.northeast.latitude,
                window.southwest.longitude,
                window.northeast.longitude,
            ],
            park_from_row,
        )?;

        let mut matches = Vec::new();
        for row in rows {
            let record = row?;
            let meters = distance(center, record.location());
            if meters <= radius_meters {
                matches.push((meters, record));
            }
        }
        matches.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        debug!(
            target: "park_store",
            radius_meters,
            matches = matches.len(),
            "probed stored parks"
        );
        Ok(matches.into_iter().map(|(_, record)| record).collect())
    }

    pub fn insert_parks(&self, records: &[ParkRecord]) -> AppResult<InsertReport> {
        let mut report = InsertReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let mut conn = self.connection.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO parks ({PARK_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT DO NOTHING"
            ))?;
            for record in records {
                let location = record.location();
                let changed = stmt.execute(params![
                    record.external_id(),
                    record.name(),
                    record.city(),
                    record.country(),
                    record.geohash(),
                    record.address(),
                    location.latitude,
                    location.longitude,
                    record.photo_url(),
                    record.website_url(),
                    record.kind(),
                ])?;
                if changed == 0 {
                    report.conflicts.push(record.external_id().to_string());
                } else {
                    report.inserted += changed;
                }
            }
        }
        tx.commit()?;

        if !report.conflicts.is_empty() {
            warn!(
                target: "park_store",
                conflicts = report.conflicts.len(),
                "skipped parks that were already stored"
            );
        }
        info!(target: "park_store", inserted = report.inserted, "persisted park batch");
        Ok(report)
    }
}

// SQLite calls block, so they run on the blocking pool.
#[async_trait]
impl ParkProber for ParkStore {
    async fn find_near(
        &self,
        center: Coordinate,
        radius_meters: f64,
        limit: Option<usize>,
    ) -> AppResult<Vec<ParkRecord>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.parks_near(center, radius_meters, limit)).await?
    }
}

#[async_trait]
impl ParkSink for ParkStore {
    async fn insert_many(&self, records: &[ParkRecord]) -> AppResult<InsertReport> {
        let store = self.clone();
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || store.insert_parks(&records)).await?
    }
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS parks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            city TEXT,
            country TEXT,
            geohash TEXT NOT NULL UNIQUE,
            address TEXT,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            photo_url TEXT,
            website_url TEXT,
            type TEXT NOT NULL DEFAULT 'dog_park',
            created_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_parks_lat_lng ON parks(lat, lng);
        "#,
    )?;
    Ok(())
}

fn park_from_row(row: &Row<'_>) -> rusqlite::Result<ParkRecord> {
    Ok(ParkRecord::from_stored(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        Coordinate::new(row.get(6)?, row.get(7)?),
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::park::NewPark;

    fn park(id: &str, lat: f64, lng: f64) -> ParkRecord {
        ParkRecord::new(NewPark {
            external_id: id.to_string(),
            name: format!("Park {id}"),
            city: Some("Stockholm".into()),
            country: Some("Sweden".into()),
            address: None,
            location: Coordinate::new(lat, lng),
            website_url: None,
        })
        .unwrap()
    }

    #[test]
    fn creates_schema_on_open() {
        let dir = tempdir().unwrap();
        let store = ParkStore::open(dir.path().join("nested").join("parks.db")).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.count().unwrap(), 0);

        let conn = store.connection.lock();
        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_parks_lat_lng'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 1);
    }

    #[test]
    fn inserts_and_reads_back_records() {
        let dir = tempdir().unwrap();
        let store = ParkStore::open(dir.path().join("parks.db")).unwrap();
        let record = park("a", 59.3206, 18.0329).with_photo_url(Some("https://img/a.jpg".into()));

        let report = store.insert_parks(&[record.clone()]).unwrap();
        assert_eq!(report.inserted, 1);
        assert!(report.conflicts.is_empty());

        let stored = store.find_by_geohash(record.geohash()).unwrap().unwrap();
        assert_eq!(stored, record);
        assert!(store.find_by_geohash("s00000000").unwrap().is_none());
    }

    #[test]
    fn reports_conflicts_and_keeps_the_rest() {
        let dir = tempdir().unwrap();
        let store = ParkStore::open(dir.path().join("parks.db")).unwrap();
        store.insert_parks(&[park("a", 59.3206, 18.0329)]).unwrap();

        let batch = vec![
            park("a", 59.40, 18.10),
            park("b", 59.3206, 18.0329),
            park("c", 59.35, 18.05),
        ];
        let report = store.insert_parks(&batch).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.conflicts, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn finds_nearest_parks_within_radius() {
        let dir = tempdir().unwrap();
        let store = ParkStore::open(dir.path().join("parks.db")).unwrap();
        store
            .insert_parks(&[
                park("far", 59.40, 18.07),
                park("near", 59.3300, 18.0690),
                park("mid", 59.3400, 18.0700),
                park("gothenburg", 57.7089, 11.9746),
            ])
            .unwrap();

        let center = Coordinate::new(59.3293, 18.0686);
        let found = store.parks_near(center, 5_000.0, None).unwrap();
        let ids: Vec<_> = found.iter().map(|p| p.external_id()).collect();
        assert_eq!(ids, vec!["near", "mid"]);

        let limited = store.parks_near(center, 10_000.0, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].external_id(), "near");
        assert!(store.parks_near(center, 0.0, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn serves_the_collaborator_traits() {
        let dir = tempdir().unwrap();
        let store = ParkStore::open(dir.path().join("parks.db")).unwrap();
        let sink: &dyn ParkSink = &store;
        let prober: &dyn ParkProber = &store;

        sink.insert_many(&[park("a", 59.3206, 18.0329)]).await.unwrap();
        let found = prober
            .find_near(Coordinate::new(59.3206, 18.0329), 100.0, Some(5))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn finds_parks_across_the_antimeridian() {
        let dir = tempdir().unwrap();
        let store = ParkStore::open(dir.path().join("parks.db")).unwrap();
        store
            .insert_parks(&[
                park("taveuni-east", -16.80, -179.95),
                park("taveuni-west", -16.80, 179.97),
                park("greenwich", -16.80, 0.0),
            ])
            .unwrap();

        let found = store
            .parks_near(Coordinate::new(-16.80, 179.95), 15_000.0, None)
            .unwrap();
        let ids: Vec<_> = found.iter().map(|p| p.external_id()).collect();
        assert_eq!(ids, vec!["taveuni-west", "taveuni-east"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_trait_calls_share_the_connection() {
        let dir = tempdir().unwrap();
        let store = ParkStore::open(dir.path().join("parks.db")).unwrap();
        let center = Coordinate::new(59.3293, 18.0686);

        let writers = (0..4).map(|batch| {
            let store = store.clone();
            tokio::spawn(async move {
                let records: Vec<_> = (0..5)
                    .map(|i| {
                        let lat = 59.3293 + (batch * 5 + i) as f64 * 0.0005;
                        park(&format!("w{batch}-{i}"), lat, 18.0686)
                    })
                    .collect();
                store.insert_many(&records).await
            })
        });
        let readers = (0..4).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.find_near(center, 20_000.0, None).await })
        });
        let writes = futures_util::future::join_all(writers).await;
        let reads = futures_util::future::join_all(readers).await;

        for write in writes {
            assert_eq!(write.unwrap().unwrap().inserted, 5);
        }
        for read in reads {
            assert!(read.unwrap().unwrap().len() <= 20);
        }
        assert_eq!(store.find_near(center, 20_000.0, None).await.unwrap().len(), 20);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parks.db");
        {
            let store = ParkStore::open(&path).unwrap();
            store.insert_parks(&[park("a", 59.3206, 18.0329)]).unwrap();
        }
        let store = ParkStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
