//! The forecast record handed back to tool callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wind speed and bearing, already formatted with units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindInfo {
    /// e.g. `"3.6 m/s"`
    pub speed: String,
    /// e.g. `"220 degrees"`
    pub direction: String,
}

/// One point in time: the current conditions or a 3-hourly forecast slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherEntry {
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub time: String,
    pub temperature: String,
    pub feels_like: String,
    pub temp_min: String,
    pub temp_max: String,
    pub weather_condition: String,
    pub humidity: String,
    pub wind: WindInfo,
    /// `"<v> mm/h"`, `"<v> mm/3h"` or `"No rain"`.
    pub rain: String,
    pub clouds: String,
}

/// Entries bucketed by local calendar date. `today` starts with the current
/// conditions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherForecast {
    pub today: Vec<WeatherEntry>,
    pub tomorrow: Vec<WeatherEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherErrorKind {
    ApiKeyMissing,
    InvalidTimezone,
    Network,
    DataStructure,
    JsonParse,
}

impl WeatherErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherErrorKind::ApiKeyMissing => "API_KEY_MISSING",
            WeatherErrorKind::InvalidTimezone => "INVALID_TIMEZONE",
            WeatherErrorKind::Network => "NETWORK_ERROR",
            WeatherErrorKind::DataStructure => "DATA_STRUCTURE_ERROR",
            WeatherErrorKind::JsonParse => "JSON_PARSE_ERROR",
        }
    }
}

/// A failed weather lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherError {
    pub kind: WeatherErrorKind,
    pub message: String,
}

impl WeatherError {
    pub fn new(kind: WeatherErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for WeatherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for WeatherError {}

impl From<WeatherError> for crate::error::Error {
    fn from(err: WeatherError) -> Self {
        crate::error::Error::Other(err.to_string())
    }
}
