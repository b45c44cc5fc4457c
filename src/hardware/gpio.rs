//! GPIO driver for the heater's solid-state relays and pump relay.
//! Owned exclusively by the Heater Controller.

use tracing::warn;

pub trait HeaterGpio: Send + Sync {
    fn set_element(&self, index: u32, on: bool) -> anyhow::Result<()>;
    fn set_pump(&self, on: bool) -> anyhow::Result<()>;
}

/// Default in the absence of real hardware: logs nothing, always succeeds.
pub struct NullHeaterGpio;

impl HeaterGpio for NullHeaterGpio {
    fn set_element(&self, _index: u32, _on: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn set_pump(&self, _on: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "gpio")]
pub struct RaspberryPiHeaterGpio {
    gpio: parking_lot::Mutex<rppal::gpio::Gpio>,
    element_pins: Vec<u8>,
    pump_pin: u8,
}

#[cfg(feature = "gpio")]
impl RaspberryPiHeaterGpio {
    pub fn new(element_pins: Vec<u8>, pump_pin: u8) -> anyhow::Result<Self> {
        Ok(Self {
            gpio: parking_lot::Mutex::new(rppal::gpio::Gpio::new()?),
            element_pins,
            pump_pin,
        })
    }
}

#[cfg(feature = "gpio")]
impl HeaterGpio for RaspberryPiHeaterGpio {
    fn set_element(&self, index: u32, on: bool) -> anyhow::Result<()> {
        let pin_no = *self
            .element_pins
            .get(index as usize)
            .ok_or_else(|| anyhow::anyhow!("no GPIO pin configured for heater element {index}"))?;
        let gpio = self.gpio.lock();
        let mut pin = gpio.get(pin_no)?.into_output();
        if on {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }

    fn set_pump(&self, on: bool) -> anyhow::Result<()> {
        let gpio = self.gpio.lock();
        let mut pin = gpio.get(self.pump_pin)?.into_output();
        // Pump relay is active-low on this site's wiring harness.
        if on {
            pin.set_low();
        } else {
            pin.set_high();
        }
        Ok(())
    }
}

pub fn build_heater_gpio(element_pins: Vec<u8>, pump_pin: u8) -> Box<dyn HeaterGpio> {
    #[cfg(feature = "gpio")]
    {
        match RaspberryPiHeaterGpio::new(element_pins, pump_pin) {
            Ok(gpio) => return Box::new(gpio),
            Err(e) => warn!(error = %e, "failed to open GPIO, falling back to a no-op driver"),
        }
    }
    #[cfg(not(feature = "gpio"))]
    {
        let _ = (element_pins, pump_pin);
    }
    Box::new(NullHeaterGpio)
}
