use crate::error::StoreError;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use zonelink_core::SensorKind;

/// READ sensors of a group joined with their type name
pub async fn read_group(conn: &sqlx::PgPool, group: i32) -> Result<Vec<(i32, String)>, StoreError> {
    Ok(sqlx::query_as::<_, (i32, String)>(
        r#"SELECT s.id, t.name
            FROM sensors AS s
            JOIN sensor_types AS t ON (s.type_id = t.id)
            WHERE s."group" = $1
            ORDER BY s.id ASC"#,
    )
    .bind(group)
    .fetch_all(conn)
    .await?)
}

/// Maps every sensor kind onto one provisioned sensor id.
///
/// `rows` must be ordered by id, the lowest id of a kind wins.
/// Unknown type names are ignored, a missing kind is an error.
pub fn resolve_bindings(rows: Vec<(i32, String)>) -> Result<Vec<(SensorKind, i32)>, StoreError> {
    let mut bindings: BTreeMap<SensorKind, i32> = BTreeMap::new();
    for (sensor_id, type_name) in rows {
        let kind = match SensorKind::from_type_name(&type_name) {
            Some(kind) => kind,
            None => {
                debug!(sensor_id = sensor_id, "Ignoring sensor type {:?}", type_name);
                continue;
            }
        };
        if let Some(bound) = bindings.get(&kind) {
            warn!(
                sensor_id = sensor_id,
                "Duplicate {} sensor, keeping sensor {}", kind, bound
            );
            continue;
        }
        bindings.insert(kind, sensor_id);
    }

    for kind in SensorKind::ALL {
        if !bindings.contains_key(&kind) {
            return Err(StoreError::MissingSensor(kind));
        }
    }
    Ok(bindings.into_iter().collect())
}
