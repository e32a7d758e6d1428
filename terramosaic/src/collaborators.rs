//! External lookups the application depends on: US city records and
//! current weather.
//!
//! Both are reached through small traits so callers can swap the backing
//! service. [`InMemoryCityLookup`] loads a JSON city list; with the `http`
//! feature, `OpenWeatherClient` queries the OpenWeather One Call 3.0 API.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{MosaicError, Result};

/// A US city with its centre coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    pub name: String,
    pub state: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub population: Option<u64>,
    #[serde(default)]
    pub area_sq_miles: Option<f64>,
    #[serde(default)]
    pub zip_codes: Vec<String>,
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Lookup of city records by name and state.
pub trait CityLookup: Send + Sync {
    /// Find a city; names compare case-insensitively.
    fn find_city(&self, name: &str, state: &str) -> Option<CityRecord>;

    /// All states with at least one city, sorted.
    fn states(&self) -> Vec<String>;

    /// City names in `state`, sorted.
    fn cities_in_state(&self, state: &str) -> Vec<String>;
}

/// City records held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCityLookup {
    cities: Vec<CityRecord>,
}

impl InMemoryCityLookup {
    pub fn new(cities: Vec<CityRecord>) -> Self {
        Self { cities }
    }

    /// Parse a JSON array of [`CityRecord`]s.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cities = serde_json::from_str(json)
            .map_err(|e| MosaicError::InvalidArgument(format!("invalid city list: {}", e)))?;
        Ok(Self::new(cities))
    }

    /// Load a JSON city list from disk.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

impl CityLookup for InMemoryCityLookup {
    fn find_city(&self, name: &str, state: &str) -> Option<CityRecord> {
        self.cities
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name) && c.state.eq_ignore_ascii_case(state))
            .cloned()
    }

    fn states(&self) -> Vec<String> {
        self.cities
            .iter()
            .map(|c| c.state.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn cities_in_state(&self, state: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .cities
            .iter()
            .filter(|c| c.state.eq_ignore_ascii_case(state))
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Current conditions, imperial units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// Degrees Fahrenheit.
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    /// Percent.
    pub humidity: Option<f64>,
    /// Miles per hour.
    pub wind_speed: Option<f64>,
    pub description: String,
    pub alerts: Vec<WeatherAlert>,
}

/// A weather alert issued for the location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAlert {
    pub event: Option<String>,
    pub description: Option<String>,
    /// Unix timestamps.
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// Structured failure payload of a weather lookup.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Failed to get weather data: {message}")]
pub struct WeatherError {
    pub message: String,
}

impl WeatherError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Lookup of current weather at a point.
pub trait WeatherLookup: Send + Sync {
    fn current(&self, lat: f64, lon: f64) -> std::result::Result<WeatherReport, WeatherError>;
}

/// Extract a [`WeatherReport`] from a One Call 3.0 response body.
///
/// Missing fields become `None` or empty; the description is title-cased.
pub fn parse_one_call(body: &Value) -> WeatherReport {
    let current = &body["current"];
    let description = current["weather"][0]["description"]
        .as_str()
        .map(title_case)
        .unwrap_or_default();

    let alerts = body["alerts"]
        .as_array()
        .map(|alerts| {
            alerts
                .iter()
                .map(|a| WeatherAlert {
                    event: a["event"].as_str().map(str::to_string),
                    description: a["description"].as_str().map(str::to_string),
                    start: a["start"].as_i64(),
                    end: a["end"].as_i64(),
                })
                .collect()
        })
        .unwrap_or_default();

    WeatherReport {
        temperature: current["temp"].as_f64(),
        feels_like: current["feels_like"].as_f64(),
        humidity: current["humidity"].as_f64(),
        wind_speed: current["wind_speed"].as_f64(),
        description,
        alerts,
    }
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(feature = "http")]
pub use self::openweather::OpenWeatherClient;

#[cfg(feature = "http")]
mod openweather {
    use std::time::Duration;

    use reqwest::blocking::Client;
    use serde_json::Value;
    use tracing::debug;

    use super::{parse_one_call, WeatherError, WeatherLookup, WeatherReport};
    use crate::error::{MosaicError, Result};

    const ONE_CALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

    /// OpenWeather One Call 3.0 client.
    pub struct OpenWeatherClient {
        client: Client,
        api_key: String,
        base_url: String,
    }

    impl OpenWeatherClient {
        pub fn new(api_key: impl Into<String>) -> Result<Self> {
            let client = Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| MosaicError::Network {
                    url: ONE_CALL_URL.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(Self {
                client,
                api_key: api_key.into(),
                base_url: ONE_CALL_URL.to_string(),
            })
        }

        /// Point the client at another endpoint, e.g. a local mock.
        pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
            self.base_url = base_url.into();
            self
        }
    }

    impl WeatherLookup for OpenWeatherClient {
        fn current(&self, lat: f64, lon: f64) -> std::result::Result<WeatherReport, WeatherError> {
            debug!(lat, lon, "Requesting weather");
            let lat = lat.to_string();
            let lon = lon.to_string();
            let response = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("lat", lat.as_str()),
                    ("lon", lon.as_str()),
                    ("units", "imperial"),
                    ("appid", self.api_key.as_str()),
                ])
                .send()
                .and_then(|r| r.error_for_status())
                .map_err(|e| WeatherError::new(e.to_string()))?;

            let body: Value = response
                .json()
                .map_err(|e| WeatherError::new(e.to_string()))?;
            Ok(parse_one_call(&body))
        }
    }
}
