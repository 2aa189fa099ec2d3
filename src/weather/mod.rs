//! The weather lookup exposed as the `get_current_weather` tool.

mod models;
mod service;

pub use models::{WeatherEntry, WeatherError, WeatherErrorKind, WeatherForecast, WindInfo};
pub use service::{WeatherConfig, WeatherService, API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_HTTP_TIMEOUT};
