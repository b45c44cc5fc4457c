//! Binary-weighted resistive heater driver with pump interlock and
//! hot-tank temperature cutoff.

use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::hardware::gpio::HeaterGpio;

const PUMP_OFF_DELAY: std::time::Duration = std::time::Duration::from_secs(30);
const INCREASE_HOLD_OFF: chrono::Duration = chrono::Duration::seconds(5);
/// Hot-tank cutoff, in deci-degrees-C (95.0 degC).
const HOT_TANK_CUTOFF_DECIC: i16 = 950;
/// Fail-safe value the setter is called with when a temperature read fails.
pub const HOT_TANK_FAILSAFE_DECIC: i16 = 1000;

struct Inner {
    enabled: bool,
    current_setting: u8,
    max_setting: u8,
    pump_on: bool,
    dont_increase_before: DateTime<Utc>,
    dont_decrease_before: DateTime<Utc>,
    hot_tank_decic: i16,
}

pub struct HeaterController {
    inner: Mutex<Inner>,
    gpio: Box<dyn HeaterGpio>,
    element_count: u32,
    self_weak: OnceLock<Weak<HeaterController>>,
}

impl HeaterController {
    pub fn new(gpio: Box<dyn HeaterGpio>, element_count: u32) -> Arc<Self> {
        let max_setting = (1u32 << element_count).saturating_sub(1) as u8;
        let now = Utc::now();
        let controller = Arc::new(Self {
            inner: Mutex::new(Inner {
                enabled: true,
                current_setting: 0,
                max_setting,
                pump_on: false,
                dont_increase_before: now,
                dont_decrease_before: now,
                hot_tank_decic: HOT_TANK_FAILSAFE_DECIC,
            }),
            gpio,
            element_count,
            self_weak: OnceLock::new(),
        });
        let _ = controller.self_weak.set(Arc::downgrade(&controller));
        controller.set_heater(0);
        controller
    }

    pub fn setting(&self) -> u8 {
        self.inner.lock().current_setting
    }

    pub fn pump_on(&self) -> bool {
        self.inner.lock().pump_on
    }

    pub fn enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Directly drive the elements to `setting`, applying the enable and
    /// overheat fail-safes and the pump interlock. A transition from a
    /// non-zero setting to zero arms a 30 s pump-off timer rather than
    /// dropping the pump immediately; a later non-zero call re-asserts the
    /// pump and implicitly cancels the pending timer.
    pub fn set_heater(&self, setting: u8) {
        let mut inner = self.inner.lock();
        let mut setting = setting;
        if !inner.enabled {
            setting = 0;
        }
        if inner.hot_tank_decic > HOT_TANK_CUTOFF_DECIC {
            setting = 0;
        }
        setting = setting.min(inner.max_setting);

        let was_on = inner.pump_on;
        inner.current_setting = setting;
        if setting > 0 {
            inner.pump_on = true;
        }
        let arm_pump_off = was_on && setting == 0;

        if let Err(e) = self.gpio.set_pump(inner.pump_on) {
            warn!(error = %e, "failed to drive pump relay");
        }
        for bit in 0..self.element_count {
            let on = (setting >> bit) & 1 != 0;
            if let Err(e) = self.gpio.set_element(bit, on) {
                warn!(error = %e, bit, "failed to drive heater element");
            }
        }
        drop(inner);

        if arm_pump_off {
            if let (Some(weak), Ok(handle)) =
                (self.self_weak.get().cloned(), tokio::runtime::Handle::try_current())
            {
                handle.spawn(async move {
                    tokio::time::sleep(PUMP_OFF_DELAY).await;
                    if let Some(strong) = weak.upgrade() {
                        strong.turn_off_pump_after_delay();
                    }
                });
            } else {
                self.turn_off_pump_after_delay();
            }
        }
    }

    pub fn turn_off_pump_after_delay(&self) {
        let mut inner = self.inner.lock();
        if inner.current_setting == 0 {
            inner.pump_on = false;
            drop(inner);
            if let Err(e) = self.gpio.set_pump(false) {
                warn!(error = %e, "failed to turn off pump relay");
            }
        }
    }

    /// Increase(f): returns true if increased, false if already at maximum.
    pub fn increase(&self, frequency_hz: f64) -> bool {
        let now = Utc::now();
        let setting = {
            let inner = self.inner.lock();
            inner.current_setting
        };
        if setting >= self.max_setting() {
            return false;
        }
        let hold_active = { self.inner.lock().dont_increase_before > now };
        if hold_active {
            // Still within the post-increase hold: pretend we did.
            return true;
        }
        self.set_heater(setting + 1);
        info!(new_setting = setting + 1, frequency_hz, "heater increased");

        let mut inner = self.inner.lock();
        inner.dont_decrease_before = if frequency_hz > 60.0 {
            now + chrono::Duration::milliseconds(((frequency_hz - 60.0) * 15_000.0) as i64)
        } else {
            now
        };
        inner.dont_increase_before = now + INCREASE_HOLD_OFF;
        true
    }

    /// Decrease(ignore_hold): returns true if decreased (or held), false if
    /// already off.
    pub fn decrease(&self, ignore_hold: bool) -> bool {
        let now = Utc::now();
        let setting = self.inner.lock().current_setting;
        if setting == 0 {
            return false;
        }
        let holding = !ignore_hold && self.inner.lock().dont_decrease_before > now;
        if holding {
            return true;
        }
        self.set_heater(setting - 1);
        info!(new_setting = setting - 1, ignore_hold, "heater decreased");
        true
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().enabled = enabled;
        if !enabled {
            self.set_heater(0);
        }
    }

    pub fn set_hot_tank_decic(&self, decic: i16) {
        self.inner.lock().hot_tank_decic = decic;
        if decic > HOT_TANK_CUTOFF_DECIC {
            warn!(decic, "hot tank over temperature, forcing heater off");
            self.set_heater(0);
        }
    }

    pub fn hot_tank_decic(&self) -> i16 {
        self.inner.lock().hot_tank_decic
    }

    fn max_setting(&self) -> u8 {
        self.inner.lock().max_setting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::gpio::NullHeaterGpio;

    fn controller() -> Arc<HeaterController> {
        HeaterController::new(Box::new(NullHeaterGpio), 3)
    }

    #[tokio::test]
    async fn setting_drop_to_zero_keeps_pump_on_until_timer_fires() {
        let h = controller();
        h.set_heater(2);
        assert!(h.pump_on());
        h.set_heater(0);
        assert!(h.pump_on(), "pump must stay asserted through the 30s grace window");
        h.turn_off_pump_after_delay();
        assert!(!h.pump_on());
    }

    #[tokio::test]
    async fn reassertion_within_grace_window_cancels_pending_pump_off() {
        let h = controller();
        h.set_heater(1);
        h.set_heater(0);
        h.set_heater(2);
        assert!(h.pump_on());
        // The delayed callback from the first zero-transition fires later
        // but must no-op since the setting is non-zero again.
        h.turn_off_pump_after_delay();
        assert!(h.pump_on());
    }

    #[test]
    fn overheat_forces_setting_to_zero() {
        let h = controller();
        h.set_heater(7);
        assert_eq!(h.setting(), 7);
        h.set_hot_tank_decic(960);
        assert_eq!(h.setting(), 0);
    }

    #[test]
    fn three_elements_setting_seven_lights_all() {
        let h = controller();
        h.set_heater(7);
        assert_eq!(h.setting(), 7);
        assert_eq!(h.max_setting(), 7);
    }

    #[test]
    fn pump_is_on_whenever_setting_nonzero() {
        let h = controller();
        h.set_heater(0);
        assert!(!h.pump_on());
        h.set_heater(1);
        assert!(h.pump_on());
    }

    #[test]
    fn disabled_forces_off_and_stays_off() {
        let h = controller();
        h.set_enabled(false);
        h.set_heater(5);
        assert_eq!(h.setting(), 0);
    }

    #[test]
    fn increase_then_immediate_increase_is_held_but_reports_true() {
        let h = controller();
        assert!(h.increase(60.0));
        assert_eq!(h.setting(), 1);
        // Within the 5s hold-off: reports true without mutating.
        assert!(h.increase(60.0));
        assert_eq!(h.setting(), 1);
    }

    #[test]
    fn decrease_from_zero_returns_false() {
        let h = controller();
        assert!(!h.decrease(true));
    }

    #[test]
    fn decrease_with_ignore_hold_bypasses_ramp_hold() {
        let h = controller();
        h.set_heater(3);
        // A high-frequency increase sets a long dont_decrease_before hold.
        assert!(h.increase(65.0));
        assert_eq!(h.setting(), 4);
        // Without ignore_hold this would be held; with it, it must apply.
        assert!(h.decrease(true));
        assert_eq!(h.setting(), 3);
    }

    #[test]
    fn idempotent_disable_then_zero() {
        let h = controller();
        h.set_enabled(false);
        h.set_heater(0);
        h.set_enabled(false);
        h.set_heater(0);
        assert_eq!(h.setting(), 0);
        assert!(!h.enabled());
    }
}
