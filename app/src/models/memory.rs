use super::measurement::{round_value, MeasurementDao};
use super::{MeasurementStore, SensorCatalog, StateStore, StoreProbe};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use zonelink_core::{SensorKind, SensorStateDto, SwitchState};

/// Volatile stores with the same contracts as the postgres ones.
///
/// Every operation runs under one lock, which also serializes writers
/// of a sensor.
pub struct MemoryStore {
    retention_cap: usize,
    sensors: Vec<(i32, String, i32)>,
    measurements: Mutex<HashMap<i32, BTreeMap<NaiveDateTime, f64>>>,
    states: Mutex<Vec<SensorStateDto>>,
}

impl MemoryStore {
    /// Seeded like the initial migration, group 1 with ids 1 to 4
    pub fn new(retention_cap: usize) -> Self {
        let sensors = SensorKind::ALL
            .iter()
            .zip(1..)
            .map(|(kind, id)| (id, kind.type_name().to_owned(), 1))
            .collect();
        Self::with_sensors(retention_cap, sensors)
    }

    /// `sensors` holds `(id, type name, group)`
    pub fn with_sensors(retention_cap: usize, sensors: Vec<(i32, String, i32)>) -> Self {
        MemoryStore {
            retention_cap: retention_cap.max(1),
            sensors,
            measurements: Mutex::new(HashMap::new()),
            states: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn record(
        &self,
        sensor_id: i32,
        timestamp: NaiveDateTime,
        value: f64,
    ) -> Result<(), StoreError> {
        let mut measurements = self.measurements.lock();
        let rows = measurements.entry(sensor_id).or_default();
        if rows.contains_key(&timestamp) {
            return Err(StoreError::Conflict {
                sensor_id,
                timestamp,
            });
        }

        rows.insert(timestamp, round_value(value));
        while rows.len() > self.retention_cap {
            rows.pop_first();
        }
        Ok(())
    }

    async fn history(&self, sensor_id: i32) -> Result<Vec<MeasurementDao>, StoreError> {
        let measurements = self.measurements.lock();
        Ok(measurements
            .get(&sensor_id)
            .map(|rows| {
                rows.iter()
                    .map(|(date, value)| MeasurementDao {
                        date: *date,
                        value: *value,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn set_state(&self, sensor_id: i32, state: SwitchState) -> Result<(), StoreError> {
        let mut states = self.states.lock();
        match states.iter_mut().find(|row| row.sensor_id == sensor_id) {
            Some(row) => row.state = state,
            None => states.push(SensorStateDto { sensor_id, state }),
        }
        Ok(())
    }

    async fn all_states(&self) -> Result<Vec<SensorStateDto>, StoreError> {
        Ok(self.states.lock().clone())
    }
}

#[async_trait]
impl SensorCatalog for MemoryStore {
    async fn sensors(&self, group: i32) -> Result<Vec<(i32, String)>, StoreError> {
        let mut rows: Vec<(i32, String)> = self
            .sensors
            .iter()
            .filter(|(_, _, sensor_group)| *sensor_group == group)
            .map(|(id, name, _)| (*id, name.clone()))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        Ok(rows)
    }
}

#[async_trait]
impl StoreProbe for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
