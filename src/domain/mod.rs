pub mod charge_band;
pub mod charger_params;
pub mod electrolyser;
pub mod heater;
pub mod twc;
pub mod types;
pub mod vehicle_api;

pub use charge_band::{estimate_level, ChargeBand};
pub use charger_params::ChargerCurrentParams;
pub use electrolyser::{Electrolyser, ElectrolyserClient};
pub use heater::HeaterController;
pub use types::*;
pub use vehicle_api::{TokenFile, VehicleApi, VehicleApiTransport};
