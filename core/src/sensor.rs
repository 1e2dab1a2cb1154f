use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The physical sensor kinds of one zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Light,
    Fan,
    Temperature,
    Humidity,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Light,
        SensorKind::Fan,
        SensorKind::Temperature,
        SensorKind::Humidity,
    ];

    /// Last topic segment the zone's devices publish on
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            SensorKind::Light => "swiatlo",
            SensorKind::Fan => "wiatrak",
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "wilgotnosc",
        }
    }

    /// Name of the matching row in the `sensor_types` catalog
    pub fn type_name(&self) -> &'static str {
        match self {
            SensorKind::Light => "light sensor",
            SensorKind::Fan => "fan",
            SensorKind::Temperature => "temperature sensor",
            SensorKind::Humidity => "humidity sensor",
        }
    }

    pub fn from_type_name(name: &str) -> Option<SensorKind> {
        let name = name.trim();
        SensorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.type_name().eq_ignore_ascii_case(name))
    }

    /// On/off actuators keep a state row, all others keep measurements
    pub fn is_switch(&self) -> bool {
        matches!(self, SensorKind::Light | SensorKind::Fan)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::Light => "light",
            SensorKind::Fan => "fan",
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

impl FromStr for SwitchState {
    type Err = ValidationError;

    /// Only the exact lowercase vocabulary is accepted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(SwitchState::On),
            "off" => Ok(SwitchState::Off),
            other => Err(ValidationError::InvalidState(other.to_owned())),
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_switch_state_vocabulary() {
        assert_eq!(Ok(SwitchState::On), "on".parse());
        assert_eq!(Ok(SwitchState::Off), "off".parse());
        assert!("ON".parse::<SwitchState>().is_err());
        assert!("toggle".parse::<SwitchState>().is_err());
        assert!(" on".parse::<SwitchState>().is_err());
    }

    #[test]
    fn test_catalog_names() {
        for kind in SensorKind::ALL {
            assert_eq!(Some(kind), SensorKind::from_type_name(kind.type_name()));
        }
        assert_eq!(
            Some(SensorKind::Fan),
            SensorKind::from_type_name(" Fan ")
        );
        assert_eq!(None, SensorKind::from_type_name("pressure sensor"));
    }
}
