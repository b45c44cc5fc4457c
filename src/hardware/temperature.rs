//! Temperature HTTP endpoints: `GET {esp}/ajax/climate` polled every 5s.
//! Out-of-range readings are rejected at this boundary so the rest of the
//! core only ever sees clean values.

use serde::Deserialize;
use tracing::warn;

const TEMPERATURE_RANGE: std::ops::Range<f64> = -50.0..200.0;
const HUMIDITY_RANGE: std::ops::RangeInclusive<f64> = 0.0..=100.0;

#[derive(Debug, Clone, Deserialize)]
struct ClimateResponse {
    temperature: f64,
    humidity: f64,
    #[serde(default)]
    rtd: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClimateReading {
    pub temperature_c: f64,
    pub humidity_percent: f64,
}

pub struct TemperaturePoller {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl TemperaturePoller {
    pub fn new(client: reqwest::Client, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    /// Polls every configured ESP endpoint; out-of-range or unreachable
    /// endpoints are logged and simply absent from the returned vector,
    /// leaving the caller's previous snapshot untouched for that sensor.
    pub async fn poll_all(&self) -> Vec<(String, ClimateReading)> {
        let mut readings = Vec::new();
        for endpoint in &self.endpoints {
            match self.poll_one(endpoint).await {
                Ok(Some(reading)) => readings.push((endpoint.clone(), reading)),
                Ok(None) => warn!(endpoint, "climate reading rejected: out of range"),
                Err(e) => warn!(endpoint, error = %e, "failed to poll temperature endpoint"),
            }
        }
        readings
    }

    async fn poll_one(&self, endpoint: &str) -> anyhow::Result<Option<ClimateReading>> {
        let url = format!("{endpoint}/ajax/climate");
        let body: ClimateResponse = self.client.get(&url).send().await?.json().await?;
        Ok(validate(body.temperature, body.humidity))
    }
}

fn validate(temperature: f64, humidity: f64) -> Option<ClimateReading> {
    if !TEMPERATURE_RANGE.contains(&temperature) || !HUMIDITY_RANGE.contains(&humidity) {
        return None;
    }
    Some(ClimateReading { temperature_c: temperature, humidity_percent: humidity })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_reading_is_accepted() {
        assert!(validate(45.0, 60.0).is_some());
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        assert!(validate(250.0, 50.0).is_none());
        assert!(validate(-60.0, 50.0).is_none());
    }

    #[test]
    fn out_of_range_humidity_is_rejected() {
        assert!(validate(40.0, 101.0).is_none());
        assert!(validate(40.0, -1.0).is_none());
    }
}
