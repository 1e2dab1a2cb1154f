use crate::config::Config;
use crate::error::{StartupError, StoreError};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zonelink_core::{SensorKind, SensorStateDto, SwitchState};

pub mod measurement;
pub mod memory;
pub mod sensor;
pub mod sensor_state;


pub use measurement::MeasurementDao;
pub use memory::MemoryStore;

/// Owns the measurement lifecycle of every sensor.
///
/// A `record` inserts the new row and prunes the oldest rows above the
/// retention cap as one unit. A duplicate `(sensor_id, timestamp)` is
/// rejected with `StoreError::Conflict` and leaves the store untouched.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn record(
        &self,
        sensor_id: i32,
        timestamp: NaiveDateTime,
        value: f64,
    ) -> Result<(), StoreError>;

    /// Retained rows, oldest first
    async fn history(&self, sensor_id: i32) -> Result<Vec<MeasurementDao>, StoreError>;
}

/// Owns the single on/off row of every switch
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn set_state(&self, sensor_id: i32, state: SwitchState) -> Result<(), StoreError>;

    /// All rows in insertion order
    async fn all_states(&self) -> Result<Vec<SensorStateDto>, StoreError>;
}

/// Read-only reference data of the provisioned sensors
#[async_trait]
pub trait SensorCatalog: Send + Sync {
    /// `(sensor_id, type name)` of a group, ordered by id
    async fn sensors(&self, group: i32) -> Result<Vec<(i32, String)>, StoreError>;

    async fn bindings(&self, group: i32) -> Result<Vec<(SensorKind, i32)>, StoreError> {
        sensor::resolve_bindings(self.sensors(group).await?)
    }
}

#[async_trait]
pub trait StoreProbe: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Every store handle the bridge needs, sharing one backend
#[derive(Clone)]
pub struct Stores {
    pub measurements: Arc<dyn MeasurementStore>,
    pub states: Arc<dyn StateStore>,
    pub catalog: Arc<dyn SensorCatalog>,
    pub probe: Arc<dyn StoreProbe>,
}

impl Stores {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: MeasurementStore + StateStore + SensorCatalog + StoreProbe + 'static,
    {
        Stores {
            measurements: backend.clone(),
            states: backend.clone(),
            catalog: backend.clone(),
            probe: backend,
        }
    }
}

/// Postgres backed stores, every call is bounded by `timeout`
pub struct PgStore {
    pub(crate) pool: PgPool,
    pub(crate) retention_cap: i64,
    pub(crate) timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, retention_cap: usize, timeout: Duration) -> Self {
        PgStore {
            pool,
            retention_cap: retention_cap as i64,
            timeout,
        }
    }
}

pub async fn establish_db_connection(database_url: &str) -> Result<PgPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
}

pub async fn check_schema(conn: &PgPool) -> Result<(), StoreError> {
    sqlx::query("SELECT count(*) as count FROM sensors")
        .fetch_one(conn)
        .await?;
    Ok(())
}

/// Opens the configured backend, migrating Postgres on the way
pub async fn connect(config: &Config) -> Result<Stores, StartupError> {
    match &config.database_url {
        Some(url) => {
            let pool = establish_db_connection(url).await?;
            sqlx::migrate!().run(&pool).await?;
            check_schema(&pool).await?;
            info!("Connected to postgres");
            Ok(Stores::from_backend(Arc::new(PgStore::new(
                pool,
                config.retention_cap,
                config.db_timeout,
            ))))
        }
        None => {
            warn!("DATABASE_URL not set, measurements and states are kept in memory only");
            Ok(Stores::from_backend(Arc::new(MemoryStore::new(
                config.retention_cap,
            ))))
        }
    }
}

pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

#[async_trait]
impl MeasurementStore for PgStore {
    async fn record(
        &self,
        sensor_id: i32,
        timestamp: NaiveDateTime,
        value: f64,
    ) -> Result<(), StoreError> {
        let pruned = with_timeout(
            self.timeout,
            measurement::insert_and_prune(&self.pool, sensor_id, timestamp, value, self.retention_cap),
        )
        .await?;
        if pruned > 0 {
            tracing::debug!(sensor_id = sensor_id, pruned = pruned, "Pruned measurements");
        }
        Ok(())
    }

    async fn history(&self, sensor_id: i32) -> Result<Vec<MeasurementDao>, StoreError> {
        with_timeout(self.timeout, measurement::get_all(&self.pool, sensor_id)).await
    }
}

#[async_trait]
impl StateStore for PgStore {
    async fn set_state(&self, sensor_id: i32, state: SwitchState) -> Result<(), StoreError> {
        with_timeout(self.timeout, sensor_state::upsert(&self.pool, sensor_id, state)).await
    }

    async fn all_states(&self) -> Result<Vec<SensorStateDto>, StoreError> {
        let daos = with_timeout(self.timeout, sensor_state::read(&self.pool)).await?;
        Ok(sensor_state::into_dtos(daos))
    }
}

#[async_trait]
impl SensorCatalog for PgStore {
    async fn sensors(&self, group: i32) -> Result<Vec<(i32, String)>, StoreError> {
        with_timeout(self.timeout, sensor::read_group(&self.pool, group)).await
    }
}

#[async_trait]
impl StoreProbe for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        with_timeout(self.timeout, check_schema(&self.pool)).await
    }
}
