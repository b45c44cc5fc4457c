//! Charge-Level Estimator: converts inverter telemetry into a tri-state
//! dispatch signal using a per-SOC voltage-band function.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::domain::types::{
    ChargeBandCoefficients, ChargeLevel, InverterSnapshot, QuinticCoefficients,
};

/// Evaluates `-A + Bx - Cx^2 + Dx^3 - Ex^4 + Fx^5` at `x`.
fn eval_quintic(c: &QuinticCoefficients, x: f64) -> f64 {
    -c.a + c.b * x - c.c * x.powi(2) + c.d * x.powi(3) - c.e * x.powi(4) + c.f * x.powi(5)
}

/// Pure, loaded once at startup; evaluated on demand by the estimator.
#[derive(Debug, Clone, Copy)]
pub struct ChargeBand {
    coefficients: ChargeBandCoefficients,
}

impl ChargeBand {
    pub fn new(coefficients: ChargeBandCoefficients) -> Result<Self> {
        let all_zero = coefficients.min.a == 0.0
            && coefficients.max.a == 0.0
            && coefficients.min.b == 0.0
            && coefficients.max.b == 0.0;
        if all_zero {
            bail!("quintic coefficients are all zero; refusing to run with a degenerate band");
        }
        Ok(Self { coefficients })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading quintic coefficients from {}", path.display()))?;
        let coefficients: ChargeBandCoefficients =
            serde_json::from_str(&raw).context("parsing quintic coefficients")?;
        Self::new(coefficients)
    }

    /// Returns (min, max) acceptable voltage delta for the given SOC.
    pub fn band(&self, soc_percent: f64) -> (f64, f64) {
        (
            eval_quintic(&self.coefficients.min, soc_percent),
            eval_quintic(&self.coefficients.max, soc_percent),
        )
    }
}

/// Evaluates the ordered charge-level predicates. The first match wins.
pub fn estimate_level(band: &ChargeBand, snapshot: &InverterSnapshot) -> ChargeLevel {
    let delta_v = (snapshot.setpoint_volts - snapshot.battery_volts) as f64;
    let (v_min, v_max) = band.band(snapshot.soc_percent as f64);
    let i = snapshot.battery_amps as f64;
    let f = snapshot.frequency_hz;

    if f > 61.0 && i < 0.0 {
        ChargeLevel::Accept
    } else if f < 59.5 && i > 0.0 {
        ChargeLevel::Reduce
    } else if delta_v > v_max && f < 61.0 && i > -60.0 {
        ChargeLevel::Reduce
    } else if delta_v < v_min || i < -80.0 {
        ChargeLevel::Accept
    } else {
        ChargeLevel::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_band(min: f64, max: f64) -> ChargeBand {
        // A flat band independent of SOC: f(x) = -A with A = -min (or -max).
        ChargeBand::new(ChargeBandCoefficients {
            min: QuinticCoefficients { a: -min, b: 0.0, c: 0.0, d: 0.0, e: 0.0, f: 0.0 },
            max: QuinticCoefficients { a: -max, b: 0.0, c: 0.0, d: 0.0, e: 0.0, f: 0.0 },
        })
        .unwrap()
    }

    fn snap(volts: f32, amps: f32, soc: f32, setpoint: f32, freq: f64) -> InverterSnapshot {
        InverterSnapshot {
            battery_volts: volts,
            battery_amps: amps,
            soc_percent: soc,
            setpoint_volts: setpoint,
            frequency_hz: freq,
            ..Default::default()
        }
    }

    #[test]
    fn zero_coefficients_are_rejected() {
        let coefficients = ChargeBandCoefficients {
            min: QuinticCoefficients { a: 0.0, b: 0.0, c: 0.0, d: 0.0, e: 0.0, f: 0.0 },
            max: QuinticCoefficients { a: 0.0, b: 0.0, c: 0.0, d: 0.0, e: 0.0, f: 0.0 },
        };
        assert!(ChargeBand::new(coefficients).is_err());
    }

    #[test]
    fn frequency_overrides_voltage_band() {
        let band = flat_band(-1.0, 1.0);
        // f > 61.0 and charging (I<0) -> Accept regardless of voltage band.
        let s = snap(53.5, -1.0, 70.0, 53.5, 61.5);
        assert_eq!(estimate_level(&band, &s), ChargeLevel::Accept);

        // f < 59.5 and discharging (I>0) -> Reduce.
        let s = snap(53.5, 1.0, 70.0, 53.5, 59.0);
        assert_eq!(estimate_level(&band, &s), ChargeLevel::Reduce);
    }

    #[test]
    fn boundary_exact_vmax_with_nominal_frequency_holds() {
        // deltaV exactly V_max with f = 61.0 -> level = 0 (predicate 3 not fired).
        let band = flat_band(-1.0, 1.0);
        let s = snap(49.0, -5.0, 70.0, 50.0, 61.0);
        assert_eq!(estimate_level(&band, &s), ChargeLevel::Hold);
    }

    #[test]
    fn sagging_battery_triggers_reduce() {
        let band = flat_band(-1.0, 1.0);
        let s = snap(48.0, 10.0, 50.0, 50.0, 60.0); // deltaV = 2.0 > vmax(1.0)
        assert_eq!(estimate_level(&band, &s), ChargeLevel::Reduce);
    }

    #[test]
    fn heavy_charge_current_triggers_accept() {
        let band = flat_band(-1.0, 1.0);
        let s = snap(53.0, -85.0, 50.0, 53.2, 60.0);
        assert_eq!(estimate_level(&band, &s), ChargeLevel::Accept);
    }

    #[test]
    fn scenario_one_surplus_car_plugged_in() {
        let band = flat_band(-2.0, 2.0);
        let s = snap(53.5, -25.0, 70.0, 53.5, 61.2);
        assert_eq!(estimate_level(&band, &s), ChargeLevel::Accept);
    }
}
