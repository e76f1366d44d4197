//! Current-weather lookup via OpenWeatherMap

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

const OPENWEATHER_URL: &str = "https://api.openweathermap.org";

/// Reply when no API key is configured
pub const MISSING_KEY_REPLY: &str =
    "Weather API key not configured. Please set OPENWEATHER_API_KEY in your environment.";

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    weather: Vec<WeatherCondition>,
    main: WeatherMain,
}

#[derive(Debug, Deserialize)]
struct WeatherCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct WeatherMain {
    temp: f64,
    humidity: f64,
}

/// OpenWeatherMap client producing spoken weather reports
#[derive(Clone)]
pub struct WeatherClient {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
}

impl std::fmt::Debug for WeatherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherClient")
            .field("base_url", &self.base_url)
            .field("has_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl WeatherClient {
    /// Create a client; an empty key counts as missing
    #[must_use]
    pub fn new(api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.expose_secret().is_empty()),
            base_url: OPENWEATHER_URL.to_string(),
        }
    }

    /// Point the client at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Spoken weather report for a city
    ///
    /// Failures are turned into apologetic replies rather than errors.
    pub async fn report(&self, city: &str) -> String {
        let Some(key) = &self.api_key else {
            return MISSING_KEY_REPLY.to_string();
        };

        match self.fetch(city, key).await {
            Ok(Some(weather)) => format_report(city, &weather),
            Ok(None) => format!("Sorry, I couldn't get the weather for {city} right now."),
            Err(e) => {
                tracing::error!(city, error = %e, "weather lookup failed");
                format!("Sorry, I had trouble getting the weather for {city}.")
            }
        }
    }

    /// Fetch current conditions; `Ok(None)` on a non-success status
    async fn fetch(&self, city: &str, key: &SecretString) -> Result<Option<WeatherResponse>> {
        let response = self
            .client
            .get(format!("{}/data/2.5/weather", self.base_url))
            .query(&[
                ("q", city),
                ("appid", key.expose_secret()),
                ("units", "metric"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(city, status = %status, body = %body, "weather API error");
            return Ok(None);
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| Error::Weather(format!("unexpected response: {e}")))
    }
}

fn format_report(city: &str, weather: &WeatherResponse) -> String {
    let description = weather
        .weather
        .first()
        .map_or("unknown conditions", |c| c.description.as_str());

    format!(
        "The current weather in {city} is {description} with a temperature of {}°C and humidity of {}%.",
        weather.main.temp, weather.main.humidity
    )
}
