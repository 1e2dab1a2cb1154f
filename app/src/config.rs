use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
    #[error("No MQTT-Brokers provided")]
    NoBrokers,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttBroker {
    pub host: String,
    pub port: u16,
}

impl FromStr for MqttBroker {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ConfigError::Invalid("MQTT_BROKERS", s.to_owned()))?;
                (host, port)
            }
            None => (s, 1883),
        };
        if host.is_empty() {
            return Err(ConfigError::Invalid("MQTT_BROKERS", s.to_owned()));
        }
        Ok(MqttBroker {
            host: host.to_owned(),
            port,
        })
    }
}

impl std::fmt::Display for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub brokers: Vec<MqttBroker>,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub tls: bool,
    pub keep_alive: Duration,
    pub timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub db_timeout: Duration,
    pub retention_cap: usize,
    pub zone: String,
    pub zone_group: i32,
    pub zone_utc_offset_secs: i64,
    pub client_buffer: usize,
    pub log_filter: String,
    pub trace_stdout: bool,
    pub mqtt: MqttConfig,
}

impl Config {
    /// Reads the process environment, a `.env` file is optional
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let brokers: Vec<MqttBroker> = lookup("MQTT_BROKERS")
            .unwrap_or_else(|| "localhost:1883".to_owned())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<MqttBroker>)
            .collect::<Result<_, _>>()?;
        if brokers.is_empty() {
            return Err(ConfigError::NoBrokers);
        }

        let credentials = match (lookup("MQTT_USERNAME"), lookup("MQTT_PASSWORD")) {
            (Some(user), Some(pw)) => Some((user, pw)),
            _ => None,
        };

        let retention_cap: usize = parse_or(&lookup, "RETENTION_CAP", 250)?;
        if retention_cap == 0 {
            return Err(ConfigError::Invalid("RETENTION_CAP", "0".to_owned()));
        }

        let mqtt = MqttConfig {
            brokers,
            client_id: lookup("MQTT_CLIENT_ID").unwrap_or_else(|| "zonelink".to_owned()),
            credentials,
            tls: parse_or(&lookup, "MQTT_TLS", false)?,
            keep_alive: Duration::from_secs(parse_or(&lookup, "MQTT_KEEP_ALIVE_SECS", 60)?),
            timeout: Duration::from_millis(parse_or(&lookup, "MQTT_TIMEOUT_MS", 3000)?),
            reconnect_base: Duration::from_millis(parse_or(
                &lookup,
                "MQTT_RECONNECT_BASE_MS",
                500,
            )?),
            reconnect_max: Duration::from_millis(parse_or(
                &lookup,
                "MQTT_RECONNECT_MAX_MS",
                30_000,
            )?),
        };

        Ok(Config {
            server_port: parse_or(&lookup, "SERVER_PORT", 5000)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_timeout: Duration::from_millis(parse_or(&lookup, "DB_TIMEOUT_MS", 3000)?),
            retention_cap,
            zone: lookup("ZONE").unwrap_or_else(|| "gr1".to_owned()),
            zone_group: parse_or(&lookup, "ZONE_GROUP", 1)?,
            zone_utc_offset_secs: parse_or(&lookup, "ZONE_UTC_OFFSET_SECS", 3600)?,
            client_buffer: parse_or(&lookup, "CLIENT_BUFFER", 64)?,
            log_filter: lookup("LOG_FILTER").unwrap_or_else(|| "info".to_owned()),
            trace_stdout: parse_or(&lookup, "TRACE_STDOUT", false)?,
            mqtt,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}
