use crate::error::StoreError;
use tracing::warn;
use zonelink_core::{SensorStateDto, SwitchState};

#[derive(sqlx::FromRow, Debug)]
pub struct SensorStateDao {
    pub(crate) sensor_id: i32,
    pub(crate) state: String,
}

pub async fn upsert(
    conn: &sqlx::PgPool,
    sensor_id: i32,
    state: SwitchState,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO sensor_states (sensor_id, state) VALUES ($1, $2)
            ON CONFLICT (sensor_id) DO UPDATE SET state = EXCLUDED.state"#,
    )
    .bind(sensor_id)
    .bind(state.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

// READ sensor_states
pub async fn read(conn: &sqlx::PgPool) -> Result<Vec<SensorStateDao>, StoreError> {
    Ok(sqlx::query_as::<_, SensorStateDao>(
        "SELECT sensor_id, state FROM sensor_states ORDER BY id ASC",
    )
    .fetch_all(conn)
    .await?)
}

/// Rows outside the on/off vocabulary are skipped
pub fn into_dtos(mut daos: Vec<SensorStateDao>) -> Vec<SensorStateDto> {
    daos.drain(..)
        .filter_map(|dao| match dao.state.parse::<SwitchState>() {
            Ok(state) => Some(SensorStateDto {
                sensor_id: dao.sensor_id,
                state,
            }),
            Err(e) => {
                warn!(sensor_id = dao.sensor_id, "Skipping stored state: {}", e);
                None
            }
        })
        .collect()
}
