use crate::error::ValidationError;
use crate::sensor::{SensorKind, SwitchState};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const TIME_OF_DAY_FORMAT: &str = "%H:%M";

/// One chart sample as the dashboard draws it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: String,
    pub y: f64,
}

impl ChartPoint {
    pub fn iso(timestamp: NaiveDateTime, value: f64) -> Self {
        ChartPoint {
            x: timestamp.format(ISO_FORMAT).to_string(),
            y: value,
        }
    }

    pub fn time_of_day(timestamp: NaiveDateTime, value: f64) -> Self {
        ChartPoint {
            x: timestamp.format(TIME_OF_DAY_FORMAT).to_string(),
            y: value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub state: SwitchState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStateDto {
    pub sensor_id: i32,
    pub state: SwitchState,
}

/// Reply to the client which issued a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub event: String,
    pub command: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// Server → client frames, encoded as `{"event": .., "data": ..}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewTemperatureData(ChartPoint),
    NewHumidityData(ChartPoint),
    LightState(StatePayload),
    FanState(StatePayload),
    InitialStates(Vec<SensorStateDto>),
    InitialTempChartData(Vec<ChartPoint>),
    InitialHumidityChartData(Vec<ChartPoint>),
    CommandResult(CommandResult),
}

impl ServerEvent {
    pub fn state(kind: SensorKind, state: SwitchState) -> Option<ServerEvent> {
        let payload = StatePayload { state };
        match kind {
            SensorKind::Light => Some(ServerEvent::LightState(payload)),
            SensorKind::Fan => Some(ServerEvent::FanState(payload)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewTemperatureData(_) => "new_temperature_data",
            ServerEvent::NewHumidityData(_) => "new_humidity_data",
            ServerEvent::LightState(_) => "light_state",
            ServerEvent::FanState(_) => "fan_state",
            ServerEvent::InitialStates(_) => "initial_states",
            ServerEvent::InitialTempChartData(_) => "initial_temp_chart_data",
            ServerEvent::InitialHumidityChartData(_) => "initial_humidity_chart_data",
            ServerEvent::CommandResult(_) => "command_result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandPayload {
    pub command: String,
}

/// Client → server frames
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Command { kind: SensorKind, command: String },
    GetStates,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientEvent {
    pub const LIGHT_COMMAND: &'static str = "light_command";
    pub const FAN_COMMAND: &'static str = "fan_command";
    pub const GET_STATES: &'static str = "get_states";

    /// Parses a text frame, the command itself is validated by the receiver
    pub fn parse(frame: &str) -> Result<ClientEvent, ValidationError> {
        let envelope: Envelope = serde_json::from_str(frame)
            .map_err(|e| ValidationError::MalformedEvent(e.to_string()))?;

        let kind = match envelope.event.as_str() {
            Self::LIGHT_COMMAND => SensorKind::Light,
            Self::FAN_COMMAND => SensorKind::Fan,
            Self::GET_STATES => return Ok(ClientEvent::GetStates),
            other => return Err(ValidationError::UnknownEvent(other.to_owned())),
        };
        let payload: CommandPayload = serde_json::from_value(envelope.data)
            .map_err(|e| ValidationError::MalformedEvent(e.to_string()))?;

        Ok(ClientEvent::Command {
            kind,
            command: payload.command,
        })
    }

    pub fn command_event(kind: SensorKind) -> &'static str {
        match kind {
            SensorKind::Fan => Self::FAN_COMMAND,
            _ => Self::LIGHT_COMMAND,
        }
    }
}
