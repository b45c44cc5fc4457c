#![cfg(feature = "db")]

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// One second's worth of plant state, the unit the time-series logger
/// inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub battery_volts: f32,
    pub battery_amps: f32,
    pub soc_percent: f32,
    pub frequency_hz: f64,
    pub car_current_ca: i32,
    pub heater_setting: u32,
    pub electrolyser_rate: u8,
}

pub struct PgRepo {
    pool: PgPool,
    last_sample: Mutex<Option<Sample>>,
}

impl PgRepo {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS samples (
                recorded_at TIMESTAMPTZ PRIMARY KEY,
                battery_volts REAL NOT NULL,
                battery_amps REAL NOT NULL,
                soc_percent REAL NOT NULL,
                frequency_hz DOUBLE PRECISION NOT NULL,
                car_current_ca INTEGER NOT NULL,
                heater_setting INTEGER NOT NULL,
                electrolyser_rate INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool, last_sample: Mutex::new(None) })
    }

    /// Inserts `sample` only if it differs from the last one recorded —
    /// the plant is often steady for long stretches and a 1 Hz tick would
    /// otherwise flood the table with duplicates.
    pub async fn record_if_changed(&self, sample: Sample, at: DateTime<Utc>) -> Result<bool> {
        {
            let last = self.last_sample.lock();
            if last.as_ref() == Some(&sample) {
                return Ok(false);
            }
        }
        sqlx::query(
            "INSERT INTO samples
                (recorded_at, battery_volts, battery_amps, soc_percent, frequency_hz,
                 car_current_ca, heater_setting, electrolyser_rate)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(at)
        .bind(sample.battery_volts)
        .bind(sample.battery_amps)
        .bind(sample.soc_percent)
        .bind(sample.frequency_hz)
        .bind(sample.car_current_ca)
        .bind(sample.heater_setting as i32)
        .bind(sample.electrolyser_rate as i32)
        .execute(&self.pool)
        .await?;
        *self.last_sample.lock() = Some(sample);
        Ok(true)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Greatest of the three hot-tank thermocouple channels logged in the
    /// last 5 minutes, in deci-degrees-C. The `analogue_input` table is
    /// populated by the site's own sensor hardware, not by this process.
    /// `Ok(None)` covers both "no rows" and any query error: the caller
    /// fails safe either way.
    pub async fn latest_hot_tank_decic(&self) -> Option<i16> {
        let row: Result<Option<(i16,)>, sqlx::Error> = sqlx::query_as(
            "SELECT GREATEST(tsh0, tsh1, tsh2) FROM analogue_input
             WHERE logged > NOW() - INTERVAL '5 minutes'
             ORDER BY logged DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await;
        match row {
            Ok(Some((decic,))) => Some(decic),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read hot tank temperature");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_samples_are_recognised_as_unchanged() {
        let a = Sample {
            battery_volts: 53.2,
            battery_amps: -5.0,
            soc_percent: 72.0,
            frequency_hz: 60.1,
            car_current_ca: 1200,
            heater_setting: 3,
            electrolyser_rate: 40,
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
