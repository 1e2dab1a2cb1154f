use crate::config::ConfigError;
use chrono::NaiveDateTime;
use std::time::Duration;
use thiserror::Error;
use zonelink_core::{error::ValidationError, SensorKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Measurement of sensor {sensor_id} at {timestamp} already exists")]
    Conflict {
        sensor_id: i32,
        timestamp: NaiveDateTime,
    },
    #[error("Store did not answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Unknown(#[from] sqlx::Error),
    #[error("No sensor of kind {0} in the catalog")]
    MissingSensor(SensorKind),
}

#[derive(Debug, Error)]
pub enum MQTTError {
    #[error("Request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("Not connected to a broker")]
    Disconnected,
    #[error("Timeout")]
    Timeout,
}

/// A push-channel command which was not relayed
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("No command topic for {0}")]
    NoRoute(SensorKind),
    #[error(transparent)]
    Publish(#[from] MQTTError),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Database unreachable: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Webserver failed: {0}")]
    Server(#[from] warp::Error),
    #[error("Failed registering signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
