use chrono::NaiveDateTime;

use crate::error::StoreError;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct MeasurementDao {
    pub(crate) date: NaiveDateTime,
    pub(crate) value: f64,
}

impl MeasurementDao {
    pub fn date(&self) -> NaiveDateTime {
        self.date
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Values are kept with two decimals
pub fn round_value(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Inserts a measurement and trims the sensor to `max_count` rows.
///
/// Runs in one transaction which holds an advisory lock on the sensor,
/// so concurrent writers of the same sensor are serialized.
/// Returns the number of pruned rows.
pub async fn insert_and_prune(
    conn: &sqlx::PgPool,
    sensor_id: i32,
    date: NaiveDateTime,
    value: f64,
    max_count: i64,
) -> Result<u64, StoreError> {
    let mut tx = conn.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(i64::from(sensor_id))
        .execute(&mut *tx)
        .await?;

    let inserted = sqlx::query(
        "INSERT INTO measurements (date, sensor_id, value) VALUES ($1, $2, ROUND($3::numeric, 2))",
    )
    .bind(date)
    .bind(sensor_id)
    .bind(value)
    .execute(&mut *tx)
    .await;
    if let Err(e) = inserted {
        // dropping tx rolls back
        return Err(conflict_or(e, sensor_id, date));
    }

    let pruned = sqlx::query(
        r#"DELETE FROM measurements
            WHERE sensor_id = $1 AND date IN (
                SELECT date FROM measurements
                WHERE sensor_id = $1
                ORDER BY date DESC
                OFFSET $2)"#,
    )
    .bind(sensor_id)
    .bind(max_count)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(pruned)
}

// READ measurements
pub async fn get_all(conn: &sqlx::PgPool, sensor_id: i32) -> Result<Vec<MeasurementDao>, StoreError> {
    Ok(sqlx::query_as::<_, MeasurementDao>(
        r#"SELECT date, value::float8 AS value
            FROM measurements
            WHERE sensor_id = $1
            ORDER BY date ASC"#,
    )
    .bind(sensor_id)
    .fetch_all(conn)
    .await?)
}

fn conflict_or(err: sqlx::Error, sensor_id: i32, timestamp: NaiveDateTime) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict {
            sensor_id,
            timestamp,
        },
        _ => StoreError::Unknown(err),
    }
}
