use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tri-state output of the charge-level estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeLevel {
    /// Reduce load: battery sagging or inverters maxed out.
    Reduce = -1,
    Hold = 0,
    /// Accept more load: surplus available.
    Accept = 1,
}

impl ChargeLevel {
    pub fn as_i8(self) -> i8 {
        match self {
            ChargeLevel::Reduce => -1,
            ChargeLevel::Hold => 0,
            ChargeLevel::Accept => 1,
        }
    }
}

/// Individual relay/status bits decoded from CAN id 0x307.
///
/// Only `generator_running` is load-bearing for dispatch; the rest are
/// carried so the status API can expose them for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InverterStatusFlags {
    pub on_relay1: bool,
    pub on_relay2: bool,
    pub generator_running: bool,
    pub auto_generator: bool,
    pub auto_load_external: bool,
    pub auto_load_soc: bool,
    pub ext_power_derate: bool,
    pub ext_vf_ok: bool,
    pub grid_down_on: bool,
    pub error: bool,
    pub running: bool,
    pub battery_fan: bool,
    pub overload: bool,
    pub external_source_connected: bool,
    pub silent: bool,
}

/// Coherent snapshot of inverter telemetry, written by the CAN ingest task
/// and read by the charge-level estimator and the load coordinator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InverterSnapshot {
    pub battery_volts: f32,
    /// Negative = charging.
    pub battery_amps: f32,
    pub soc_percent: f32,
    pub setpoint_volts: f32,
    pub frequency_hz: f64,
    pub max_current_amps: f32,
    pub generator_running: bool,
    pub flags: InverterStatusFlags,
}

impl Default for InverterSnapshot {
    fn default() -> Self {
        Self {
            battery_volts: 0.0,
            battery_amps: 0.0,
            soc_percent: 0.0,
            setpoint_volts: 0.0,
            frequency_hz: 60.0,
            max_current_amps: 0.0,
            generator_running: false,
            flags: InverterStatusFlags::default(),
        }
    }
}

/// Coefficients of one quintic polynomial `-A + Bx - Cx^2 + Dx^3 - Ex^4 + Fx^5`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct QuinticCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

/// Both bands loaded once at startup from the quintic coefficient file.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ChargeBandCoefficients {
    pub min: QuinticCoefficients,
    pub max: QuinticCoefficients,
}

/// Reported status codes carried by a TWC slave heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SlaveStatus {
    Ready = 0,
    Charging = 1,
    NoMaster = 2,
    DoNotCharge = 3,
    ReadyToCharge = 4,
    Busy = 5,
    LoweringPower = 6,
    RaisingPower = 7,
    StartingToCharge = 8,
    LimitingPower = 9,
    AdjustmentComplete = 10,
}

impl SlaveStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        use SlaveStatus::*;
        Some(match code {
            0 => Ready,
            1 => Charging,
            2 => NoMaster,
            3 => DoNotCharge,
            4 => ReadyToCharge,
            5 => Busy,
            6 => LoweringPower,
            7 => RaisingPower,
            8 => StartingToCharge,
            9 => LimitingPower,
            10 => AdjustmentComplete,
            _ => return None,
        })
    }

    /// True for the statuses in which a slave is considered to want power.
    pub fn requests_charge(self) -> bool {
        matches!(
            self,
            SlaveStatus::DoNotCharge
                | SlaveStatus::ReadyToCharge
                | SlaveStatus::Charging
                | SlaveStatus::LoweringPower
                | SlaveStatus::RaisingPower
                | SlaveStatus::StartingToCharge
                | SlaveStatus::LimitingPower
                | SlaveStatus::AdjustmentComplete
        )
    }
}

/// Read-only view of a slave record, published for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct SlaveSnapshot {
    pub address: u16,
    pub reported_current_ca: i16,
    pub reported_setpoint_ca: i16,
    pub allowed_ca: i16,
    pub status: Option<SlaveStatus>,
    pub last_heartbeat: DateTime<Utc>,
    pub stopped: bool,
    pub disabled: bool,
}

/// Electrolyser device state as reported by `GET /el/getRate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectrolyserStatus {
    Off,
    Idle,
    Standby,
    Active,
}

impl ElectrolyserStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OFF" => Some(Self::Off),
            "Idle" => Some(Self::Idle),
            "Standby" => Some(Self::Standby),
            "Active" => Some(Self::Active),
            _ => None,
        }
    }
}
