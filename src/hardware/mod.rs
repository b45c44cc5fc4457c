pub mod can;
pub mod factory;
pub mod gpio;
pub mod temperature;

pub use factory::{HardwareMode, SiteHardware};
