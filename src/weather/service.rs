//! HTTP client for the OpenWeatherMap 2.5 API, reshaped into [`WeatherForecast`].

use super::models::{WeatherEntry, WeatherError, WeatherErrorKind, WeatherForecast, WindInfo};
use chrono::{DateTime, Days, FixedOffset, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl WeatherConfig {
    /// Defaults, with the API key taken from `OPENWEATHER_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()),
            ..Self::default()
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Which rain accumulation window an entry reports.
#[derive(Debug, Clone, Copy)]
enum RainWindow {
    OneHour,
    ThreeHours,
}

impl RainWindow {
    fn key(self) -> &'static str {
        match self {
            RainWindow::OneHour => "1h",
            RainWindow::ThreeHours => "3h",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            RainWindow::OneHour => "mm/h",
            RainWindow::ThreeHours => "mm/3h",
        }
    }
}

pub struct WeatherService {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WeatherService {
    pub fn new(config: WeatherConfig) -> Result<Self, WeatherError> {
        let api_key = config.api_key.filter(|key| !key.is_empty()).ok_or_else(|| {
            WeatherError::new(
                WeatherErrorKind::ApiKeyMissing,
                format!("API key not found. Set {} or pass one explicitly", API_KEY_ENV),
            )
        })?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WeatherError::new(WeatherErrorKind::Network, e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Current conditions plus today's and tomorrow's 3-hourly forecast for
    /// `location`, in the zone `timezone_offset` hours east of UTC.
    pub async fn get_forecast(
        &self,
        location: &str,
        timezone_offset: i32,
    ) -> Result<WeatherForecast, WeatherError> {
        self.get_forecast_at(location, timezone_offset, Utc::now())
            .await
    }

    /// Same as [`Self::get_forecast`] with an explicit "now".
    pub async fn get_forecast_at(
        &self,
        location: &str,
        timezone_offset: i32,
        now: DateTime<Utc>,
    ) -> Result<WeatherForecast, WeatherError> {
        let tz = timezone_offset
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                WeatherError::new(
                    WeatherErrorKind::InvalidTimezone,
                    format!("timezone offset out of range: {} hours", timezone_offset),
                )
            })?;
        let local_now = now.with_timezone(&tz);
        let today = local_now.date_naive();
        let tomorrow = today + Days::new(1);

        let (lat, lon) = self.coordinates(location).await?;
        debug!(location, lat, lon, "Resolved coordinates");

        let position = [("lat", lat.to_string()), ("lon", lon.to_string())];

        let current = self.fetch("weather", &position).await?;
        let mut forecast = WeatherForecast {
            today: vec![format_entry(&current, local_now, RainWindow::OneHour)?],
            tomorrow: Vec::new(),
        };

        let upcoming = self.fetch("forecast", &position).await?;
        let slots = field(&upcoming, "list")?.as_array().ok_or_else(|| {
            WeatherError::new(WeatherErrorKind::DataStructure, "'list' is not an array")
        })?;
        for slot in slots {
            let timestamp = field(slot, "dt")?.as_i64().ok_or_else(|| {
                WeatherError::new(WeatherErrorKind::DataStructure, "'dt' is not an integer")
            })?;
            let Some(at) = DateTime::from_timestamp(timestamp, 0) else {
                warn!(timestamp, "Skipping forecast slot with invalid timestamp");
                continue;
            };
            let at = at.with_timezone(&tz);
            if at.date_naive() == today {
                forecast
                    .today
                    .push(format_entry(slot, at, RainWindow::ThreeHours)?);
            } else if at.date_naive() == tomorrow {
                forecast
                    .tomorrow
                    .push(format_entry(slot, at, RainWindow::ThreeHours)?);
            }
        }

        debug!(
            location,
            today = forecast.today.len(),
            tomorrow = forecast.tomorrow.len(),
            "Forecast assembled"
        );
        Ok(forecast)
    }

    async fn coordinates(&self, location: &str) -> Result<(f64, f64), WeatherError> {
        let data = self
            .fetch("weather", &[("q", location.to_string())])
            .await?;
        let coordinate = |path: &str| {
            field(&data, path)?.as_f64().ok_or_else(|| {
                WeatherError::new(
                    WeatherErrorKind::DataStructure,
                    format!("'{}' is not a number", path),
                )
            })
        };
        Ok((coordinate("coord.lat")?, coordinate("coord.lon")?))
    }

    async fn fetch(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value, WeatherError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let network = |e: reqwest::Error| {
            WeatherError::new(WeatherErrorKind::Network, format!("request failed: {}", e))
        };

        let body = self
            .http
            .get(&url)
            .query(query)
            .query(&[("appid", self.api_key.as_str()), ("units", "metric")])
            .send()
            .await
            .map_err(network)?
            .error_for_status()
            .map_err(network)?
            .text()
            .await
            .map_err(network)?;

        serde_json::from_str(&body).map_err(|e| {
            WeatherError::new(
                WeatherErrorKind::JsonParse,
                format!("invalid JSON from {}: {}", endpoint, e),
            )
        })
    }
}

/// Walks a dotted path such as `weather.0.description`.
fn field<'a>(value: &'a Value, path: &str) -> Result<&'a Value, WeatherError> {
    path.split('.')
        .try_fold(value, |current, segment| match current {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => current.get(segment),
        })
        .ok_or_else(|| {
            WeatherError::new(
                WeatherErrorKind::DataStructure,
                format!("missing key '{}'", path),
            )
        })
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_entry(
    entry: &Value,
    at: DateTime<FixedOffset>,
    window: RainWindow,
) -> Result<WeatherEntry, WeatherError> {
    let celsius = |path: &str| field(entry, path).map(|v| format!("{} °C", plain(v)));
    let rain = match entry.get("rain") {
        Some(rain) => {
            let amount = rain
                .get(window.key())
                .map(plain)
                .unwrap_or_else(|| "0".to_string());
            format!("{} {}", amount, window.unit())
        }
        None => "No rain".to_string(),
    };

    Ok(WeatherEntry {
        time: at.format(TIME_FORMAT).to_string(),
        temperature: celsius("main.temp")?,
        feels_like: celsius("main.feels_like")?,
        temp_min: celsius("main.temp_min")?,
        temp_max: celsius("main.temp_max")?,
        weather_condition: plain(field(entry, "weather.0.description")?),
        humidity: format!("{}%", plain(field(entry, "main.humidity")?)),
        wind: WindInfo {
            speed: format!("{} m/s", plain(field(entry, "wind.speed")?)),
            direction: format!("{} degrees", plain(field(entry, "wind.deg")?)),
        },
        rain,
        clouds: format!("{}%", plain(field(entry, "clouds.all")?)),
    })
}
