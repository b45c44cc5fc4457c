//! TWC Slave Record: per-slave allocation, setpoint tracking, spike
//! window, and stop/disable escalation.

use chrono::{DateTime, Utc};

use crate::domain::types::{SlaveSnapshot, SlaveStatus};

const SPIKE_WINDOW: chrono::Duration = chrono::Duration::seconds(6);
const SPIKE_VALUE_CA: i16 = 1600;
const ESCALATION_STOP_AFTER: chrono::Duration = chrono::Duration::minutes(4);
const ESCALATION_DISABLE_AFTER: chrono::Duration = chrono::Duration::minutes(5);
const ESCALATION_CURRENT_THRESHOLD_CA: i16 = 20;
const ESCALATION_STOP_CURRENT_THRESHOLD_CA: i16 = 50;
const EVICTION_SILENCE: chrono::Duration = chrono::Duration::seconds(10);
const EVICTION_ALLOWED_THRESHOLD_CA: i16 = 599;
const RESUME_ALLOWED_THRESHOLD_CA: i16 = 600;

/// What the coordinator loop asked the caller to do about a slave after
/// observing a heartbeat or timeout tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    None,
    InvokeStop,
    OperatorAlertAndDisable,
    InvokeStart,
}

pub struct SlaveRecord {
    pub address: u16,
    pub reported_current_ca: i16,
    pub reported_setpoint_ca: i16,
    pub allowed_ca: i16,
    pub status: Option<SlaveStatus>,
    pub last_heartbeat: DateTime<Utc>,
    spike_until: Option<DateTime<Utc>>,
    spike_value_ca: i16,
    zero_amps_since: Option<DateTime<Utc>>,
    pub stopped: bool,
    pub disabled: bool,
}

impl SlaveRecord {
    pub fn new(address: u16) -> Self {
        Self {
            address,
            reported_current_ca: 0,
            reported_setpoint_ca: 0,
            allowed_ca: 0,
            status: None,
            last_heartbeat: Utc::now(),
            spike_until: None,
            spike_value_ca: 0,
            zero_amps_since: None,
            stopped: false,
            disabled: false,
        }
    }

    pub fn observe_heartbeat(&mut self, status_code: u8, setpoint_ca: i16, current_ca: i16) {
        self.status = SlaveStatus::from_code(status_code);
        self.reported_setpoint_ca = setpoint_ca;
        self.reported_current_ca = current_ca;
        self.last_heartbeat = Utc::now();
    }

    pub fn requests_charge(&self) -> bool {
        self.status.map(SlaveStatus::requests_charge).unwrap_or(false)
    }

    /// Sets a new allowed value, arming the spike window (4.4.4) if the
    /// raise qualifies.
    pub fn set_allowed(&mut self, new_allowed_ca: i16) {
        let old = self.allowed_ca;
        if new_allowed_ca > old && old > 0 && old < SPIKE_VALUE_CA && new_allowed_ca < SPIKE_VALUE_CA {
            self.spike_until = Some(Utc::now() + SPIKE_WINDOW);
            self.spike_value_ca = SPIKE_VALUE_CA;
        }
        self.allowed_ca = new_allowed_ca;
    }

    /// The value to actually send on the next heartbeat: the spike value
    /// while the spike window is open, otherwise the allowed value.
    pub fn heartbeat_setpoint(&mut self) -> i16 {
        if let Some(until) = self.spike_until {
            if Utc::now() < until {
                return self.spike_value_ca;
            }
            self.spike_until = None;
        }
        self.allowed_ca
    }

    pub fn is_silent_for(&self, duration: chrono::Duration) -> bool {
        Utc::now() - self.last_heartbeat > duration
    }

    /// Whether this slave should be dropped from the table entirely.
    pub fn should_evict(&self) -> bool {
        self.is_silent_for(EVICTION_SILENCE) && self.allowed_ca > EVICTION_ALLOWED_THRESHOLD_CA
    }

    /// Runs the stop-enforcement escalation ladder and returns what the
    /// caller should do, if anything. Must be called once per
    /// master-loop tick per slave.
    pub fn tick_escalation(&mut self) -> Escalation {
        if self.allowed_ca != 0 {
            // A non-zero allowance clears any pending zero-amps tracking;
            // a resume transition (stopped slave being re-enabled) is
            // signalled to the caller.
            let was_stopped = self.stopped;
            self.zero_amps_since = None;
            if was_stopped && self.allowed_ca >= RESUME_ALLOWED_THRESHOLD_CA {
                self.stopped = false;
                return Escalation::InvokeStart;
            }
            return Escalation::None;
        }

        if self.reported_current_ca <= ESCALATION_CURRENT_THRESHOLD_CA {
            self.zero_amps_since = None;
            return Escalation::None;
        }

        let since = *self.zero_amps_since.get_or_insert_with(Utc::now);
        let elapsed = Utc::now() - since;

        if elapsed >= ESCALATION_DISABLE_AFTER && !self.stopped {
            self.disabled = true;
            return Escalation::OperatorAlertAndDisable;
        }
        if elapsed >= ESCALATION_STOP_AFTER
            && self.reported_current_ca > ESCALATION_STOP_CURRENT_THRESHOLD_CA
            && !self.stopped
        {
            self.stopped = true;
            return Escalation::InvokeStop;
        }
        Escalation::None
    }

    pub fn snapshot(&self) -> SlaveSnapshot {
        SlaveSnapshot {
            address: self.address,
            reported_current_ca: self.reported_current_ca,
            reported_setpoint_ca: self.reported_setpoint_ca,
            allowed_ca: self.allowed_ca,
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            stopped: self.stopped,
            disabled: self.disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_request_charge_matches_known_set() {
        for code in [1u8, 3, 4, 6, 7, 8, 9, 10] {
            let status = SlaveStatus::from_code(code).unwrap();
            assert!(status.requests_charge(), "code {code} should request charge");
        }
        for code in [0u8, 2, 5] {
            let status = SlaveStatus::from_code(code).unwrap();
            assert!(!status.requests_charge(), "code {code} should not request charge");
        }
    }

    #[test]
    fn raise_within_spike_band_arms_spike_window() {
        let mut s = SlaveRecord::new(0x1234);
        s.set_allowed(800);
        s.set_allowed(1200);
        assert_eq!(s.heartbeat_setpoint(), SPIKE_VALUE_CA);
    }

    #[test]
    fn raise_above_spike_band_does_not_spike() {
        let mut s = SlaveRecord::new(0x1234);
        s.set_allowed(1700);
        s.set_allowed(2000);
        assert_eq!(s.heartbeat_setpoint(), 2000);
    }

    #[test]
    fn eviction_requires_both_silence_and_nonzero_allowance() {
        let mut s = SlaveRecord::new(0x1234);
        s.set_allowed(0);
        s.last_heartbeat = Utc::now() - chrono::Duration::seconds(20);
        assert!(!s.should_evict(), "allowed=0 slaves are kept, not evicted");

        s.set_allowed(700);
        assert!(s.should_evict());
    }

    #[test]
    fn escalation_ladder_stop_then_disable() {
        let mut s = SlaveRecord::new(0x1234);
        s.allowed_ca = 0;
        s.reported_current_ca = 800; // > 50 cA
        s.zero_amps_since = Some(Utc::now() - chrono::Duration::minutes(4) - chrono::Duration::seconds(1));
        assert_eq!(s.tick_escalation(), Escalation::InvokeStop);
        assert!(s.stopped);

        // A further minute passes with no change: operator alert + disable.
        s.zero_amps_since = Some(Utc::now() - chrono::Duration::minutes(5) - chrono::Duration::seconds(1));
        s.stopped = false; // disable fires independently of the stop flag
        assert_eq!(s.tick_escalation(), Escalation::OperatorAlertAndDisable);
        assert!(s.disabled);
    }

    #[test]
    fn resume_invokes_start_only_from_stopped_state() {
        let mut s = SlaveRecord::new(0x1234);
        s.stopped = true;
        s.set_allowed(600);
        assert_eq!(s.tick_escalation(), Escalation::InvokeStart);
        assert!(!s.stopped);

        // Already-resumed slave does not re-invoke start.
        s.set_allowed(700);
        assert_eq!(s.tick_escalation(), Escalation::None);
    }
}
