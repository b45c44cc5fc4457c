//! TWC Master Loop: link-ready handshake bookkeeping and per-slave current
//! division. The byte-level serial I/O and task scheduling live in
//! `controller::coordinator`; this module is the pure state this loop
//! advances once per second.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::domain::twc::slave::{Escalation, SlaveRecord};
use crate::domain::types::SlaveSnapshot;

const LINK_READY_COUNTDOWN_START: u32 = 10;
const PER_SLAVE_FLOOR_CA: i16 = 500;
const SENTINEL_NON_REQUESTING_CA: i16 = 2500;
const SOC_UNDER_FLOOR_PIVOT: f32 = 85.0;

/// Master-emitted codes, counterpart to the slave codes in `codec.rs`.
pub const CODE_MASTER_LINK_READY_1: u16 = 0xFBE2;
pub const CODE_MASTER_LINK_READY_2: u16 = 0xFBE0;
pub const CODE_MASTER_HEARTBEAT: u16 = 0xFBE3;

/// Which link-ready variant (if any) the master should emit this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkReadyAction {
    None,
    EmitLinkReady1,
    EmitLinkReady2,
}

pub struct SlaveTable {
    slaves: HashMap<u16, SlaveRecord>,
    link_ready_countdown: u32,
}

impl SlaveTable {
    pub fn new() -> Self {
        Self {
            slaves: HashMap::new(),
            link_ready_countdown: LINK_READY_COUNTDOWN_START,
        }
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    /// Registers a slave on first observation (heartbeat or link-ready).
    pub fn find_or_register(&mut self, address: u16) -> &mut SlaveRecord {
        self.slaves.entry(address).or_insert_with(|| {
            info!(address = format!("{:#06x}", address), "registered new TWC slave");
            SlaveRecord::new(address)
        })
    }

    pub fn on_heartbeat(&mut self, address: u16, status_code: u8, setpoint_ca: i16, current_ca: i16) {
        self.find_or_register(address)
            .observe_heartbeat(status_code, setpoint_ca, current_ca);
    }

    pub fn on_link_ready(&mut self, address: u16) {
        self.find_or_register(address);
    }

    /// Decides whether to emit a link-ready frame this tick and advances
    /// the countdown.
    pub fn link_ready_action(&mut self) -> LinkReadyAction {
        if !self.slaves.is_empty() {
            return LinkReadyAction::None;
        }
        let action = if self.link_ready_countdown > 5 {
            LinkReadyAction::EmitLinkReady1
        } else if self.link_ready_countdown > 0 {
            LinkReadyAction::EmitLinkReady2
        } else {
            LinkReadyAction::None
        };
        if self.link_ready_countdown > 0 {
            self.link_ready_countdown -= 1;
        }
        action
    }

    /// Evicts slaves that have gone silent with a meaningful allowance
    /// outstanding; slaves silent with allowed=0 are kept with their
    /// allowance held at zero.
    pub fn evict_timed_out(&mut self) -> Vec<u16> {
        let to_evict: Vec<u16> = self
            .slaves
            .iter()
            .filter(|(_, s)| s.should_evict())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &to_evict {
            warn!(address = format!("{:#06x}", addr), "evicting timed-out TWC slave");
            self.slaves.remove(addr);
        }
        to_evict
    }

    /// Zeroes out slaves that have gone silent but are kept (allowed <=
    /// 599 cA); a zero allowance is expected to stop their heartbeats.
    pub fn zero_out_silent_kept_slaves(&mut self) {
        for slave in self.slaves.values_mut() {
            if slave.is_silent_for(chrono::Duration::seconds(10)) && slave.allowed_ca <= 599 {
                slave.set_allowed(0);
            }
        }
    }

    /// Divides `max_amps_ca` equally among all requesting slaves, applying
    /// the under-floor SOC rule.
    pub fn divide_current(&mut self, max_amps_ca: i16, soc_percent: f32) {
        let requesting: Vec<u16> = self
            .slaves
            .iter()
            .filter(|(_, s)| s.requests_charge() && !s.disabled)
            .map(|(addr, _)| *addr)
            .collect();

        let active = requesting.len() as i16;
        let per_slave = if active > 0 { max_amps_ca / active } else { 0 };
        let per_slave = if per_slave < PER_SLAVE_FLOOR_CA {
            if soc_percent > SOC_UNDER_FLOOR_PIVOT {
                PER_SLAVE_FLOOR_CA
            } else {
                0
            }
        } else {
            per_slave
        };

        for (addr, slave) in self.slaves.iter_mut() {
            if requesting.contains(addr) {
                slave.set_allowed(per_slave);
            } else {
                slave.set_allowed(SENTINEL_NON_REQUESTING_CA);
            }
        }
    }

    /// Runs the stop/resume escalation ladder for every slave and returns
    /// the actions the caller must take (invoking the vehicle API and/or
    /// an operator alert is the caller's responsibility).
    pub fn tick_escalations(&mut self) -> Vec<(u16, Escalation)> {
        self.slaves
            .iter_mut()
            .map(|(addr, slave)| (*addr, slave.tick_escalation()))
            .filter(|(_, e)| *e != Escalation::None)
            .collect()
    }

    pub fn heartbeat_setpoints(&mut self) -> Vec<(u16, i16)> {
        self.slaves
            .iter_mut()
            .filter(|(_, s)| !s.disabled)
            .map(|(addr, s)| (*addr, s.heartbeat_setpoint()))
            .collect()
    }

    pub fn total_reported_current_ca(&self) -> i32 {
        self.slaves.values().map(|s| s.reported_current_ca as i32).sum()
    }

    pub fn snapshots(&self) -> Vec<SlaveSnapshot> {
        self.slaves.values().map(SlaveRecord::snapshot).collect()
    }
}

impl Default for SlaveTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_ready_emits_variant_one_then_two_then_stops() {
        let mut table = SlaveTable::new();
        for _ in 0..5 {
            assert_eq!(table.link_ready_action(), LinkReadyAction::EmitLinkReady1);
        }
        for _ in 0..5 {
            assert_eq!(table.link_ready_action(), LinkReadyAction::EmitLinkReady2);
        }
        assert_eq!(table.link_ready_action(), LinkReadyAction::None);
    }

    #[test]
    fn link_ready_stops_once_a_slave_is_known() {
        let mut table = SlaveTable::new();
        table.on_link_ready(0x1234);
        assert_eq!(table.link_ready_action(), LinkReadyAction::None);
    }

    #[test]
    fn divide_current_soc_boundary_exactly_85_floors_to_zero() {
        let mut table = SlaveTable::new();
        table.on_heartbeat(0x1111, 1, 0, 0); // Charging -> requests
        table.divide_current(100, 85.0);
        assert_eq!(table.snapshots()[0].allowed_ca, 0);
    }

    #[test]
    fn divide_current_soc_just_above_85_raises_to_floor() {
        let mut table = SlaveTable::new();
        table.on_heartbeat(0x1111, 1, 0, 0);
        table.divide_current(100, 85.000001);
        assert_eq!(table.snapshots()[0].allowed_ca, PER_SLAVE_FLOOR_CA);
    }

    #[test]
    fn non_requesting_slaves_get_sentinel_value() {
        let mut table = SlaveTable::new();
        table.on_heartbeat(0x1111, 0, 0, 0); // Ready -> does not request
        table.divide_current(4800, 50.0);
        assert_eq!(table.snapshots()[0].allowed_ca, SENTINEL_NON_REQUESTING_CA);
    }

    #[test]
    fn eviction_keeps_zero_allowance_slaves() {
        let mut table = SlaveTable::new();
        table.on_heartbeat(0x1111, 1, 0, 0);
        {
            let slave = table.find_or_register(0x1111);
            slave.set_allowed(0);
            slave.last_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(20);
        }
        let evicted = table.evict_timed_out();
        assert!(evicted.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn eviction_drops_slaves_with_meaningful_allowance() {
        let mut table = SlaveTable::new();
        table.on_heartbeat(0x1111, 1, 0, 0);
        {
            let slave = table.find_or_register(0x1111);
            slave.set_allowed(700);
            slave.last_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(20);
        }
        let evicted = table.evict_timed_out();
        assert_eq!(evicted, vec![0x1111]);
        assert_eq!(table.len(), 0);
    }
}
