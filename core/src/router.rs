use crate::error::ValidationError;
use crate::sensor::{SensorKind, SwitchState};
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// A broker message translated into the bridge's domain
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedEvent {
    TemperatureReading {
        sensor_id: i32,
        value: f64,
        timestamp: NaiveDateTime,
    },
    HumidityReading {
        sensor_id: i32,
        value: f64,
        timestamp: NaiveDateTime,
    },
    LightStateChanged {
        sensor_id: i32,
        state: SwitchState,
    },
    FanStateChanged {
        sensor_id: i32,
        state: SwitchState,
    },
    Unrecognized(ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    pub sensor_id: i32,
    pub kind: SensorKind,
}

/// Static topic table of a single zone.
///
/// Inbound topics are `<zone>/<suffix>`, command topics for the
/// switches are `<zone>_ui/<suffix>`. The table is built from the
/// sensor catalog, so routing never assumes sensor ids.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    zone: String,
    inbound: HashMap<String, Route>,
    by_kind: HashMap<SensorKind, i32>,
}

impl TopicRouter {
    pub fn new<I>(zone: &str, bindings: I) -> Self
    where
        I: IntoIterator<Item = (SensorKind, i32)>,
    {
        let mut inbound = HashMap::new();
        let mut by_kind = HashMap::new();
        for (kind, sensor_id) in bindings {
            let topic = format!("{}/{}", zone, kind.topic_suffix());
            inbound.insert(topic, Route { sensor_id, kind });
            by_kind.insert(kind, sensor_id);
        }

        TopicRouter {
            zone: zone.to_owned(),
            inbound,
            by_kind,
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Translates a broker message, `received_at` stamps readings
    pub fn route(&self, topic: &str, payload: &str, received_at: NaiveDateTime) -> RoutedEvent {
        let route = match self.inbound.get(topic) {
            Some(route) => *route,
            None => return RoutedEvent::Unrecognized(ValidationError::UnknownTopic(topic.to_owned())),
        };

        if route.kind.is_switch() {
            let state = match payload.parse::<SwitchState>() {
                Ok(state) => state,
                Err(e) => return RoutedEvent::Unrecognized(e),
            };
            let sensor_id = route.sensor_id;
            return match route.kind {
                SensorKind::Light => RoutedEvent::LightStateChanged { sensor_id, state },
                _ => RoutedEvent::FanStateChanged { sensor_id, state },
            };
        }

        let value = match parse_reading(payload) {
            Some(value) => value,
            None => {
                return RoutedEvent::Unrecognized(ValidationError::InvalidValue(payload.to_owned()))
            }
        };
        let sensor_id = route.sensor_id;
        let timestamp = received_at;
        match route.kind {
            SensorKind::Temperature => RoutedEvent::TemperatureReading {
                sensor_id,
                value,
                timestamp,
            },
            _ => RoutedEvent::HumidityReading {
                sensor_id,
                value,
                timestamp,
            },
        }
    }

    /// All inbound topics, in catalog order
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<(SensorKind, &String)> = self
            .inbound
            .iter()
            .map(|(topic, route)| (route.kind, topic))
            .collect();
        topics.sort();
        topics.drain(..).map(|(_, topic)| topic.clone()).collect()
    }

    /// Command topic the actuators of `kind` listen on
    pub fn command_topic(&self, kind: SensorKind) -> Option<String> {
        if !kind.is_switch() || !self.by_kind.contains_key(&kind) {
            return None;
        }
        Some(format!("{}_ui/{}", self.zone, kind.topic_suffix()))
    }

    pub fn sensor_id(&self, kind: SensorKind) -> Option<i32> {
        self.by_kind.get(&kind).copied()
    }
}

/// Readings are stored with two decimals and at most eight integer digits
const READING_LIMIT: f64 = 1e8;

fn parse_reading(payload: &str) -> Option<f64> {
    let value: f64 = payload.trim().parse().ok()?;
    if value.is_finite() && (value * 100.0).round().abs() < READING_LIMIT * 100.0 {
        Some(value)
    } else {
        None
    }
}
