//! CAN ingest: decodes the four inverter message IDs into an
//! `InverterSnapshot` update. This module is a thin typed-push-feed adapter
//! over whichever CAN backend is compiled in.

use async_trait::async_trait;
use tracing::warn;

use crate::domain::types::InverterStatusFlags;

pub const CAN_ID_BATTERY: u32 = 0x305;
pub const CAN_ID_SETPOINT: u32 = 0x306;
pub const CAN_ID_FREQUENCY: u32 = 0x010;
pub const CAN_ID_STATUS: u32 = 0x307;

#[derive(Debug, Clone, Copy)]
pub struct CanFrame {
    pub id: u32,
    pub data: [u8; 8],
    pub len: u8,
}

/// One field-group update, as produced by decoding a single CAN frame.
/// Kept small and field-grouped so the inverter snapshot writer can apply
/// it as one atomic critical section.
#[derive(Debug, Clone, Copy)]
pub enum InverterUpdate {
    BatteryElectrical { volts: f32, amps: f32, soc_percent: f32 },
    Setpoint { volts: f32 },
    Frequency { hz: f64 },
    Status { flags: InverterStatusFlags, max_current_amps: f32 },
}

pub fn decode(frame: &CanFrame) -> Option<InverterUpdate> {
    match frame.id {
        CAN_ID_BATTERY if frame.len >= 6 => {
            let volts = i16::from_be_bytes([frame.data[0], frame.data[1]]) as f32 / 100.0;
            let amps = i16::from_be_bytes([frame.data[2], frame.data[3]]) as f32 / 100.0;
            let soc = i16::from_be_bytes([frame.data[4], frame.data[5]]) as f32 / 100.0;
            Some(InverterUpdate::BatteryElectrical { volts, amps, soc_percent: soc })
        }
        CAN_ID_SETPOINT if frame.len >= 2 => {
            let setpoint = i16::from_be_bytes([frame.data[0], frame.data[1]]) as f32 / 100.0;
            Some(InverterUpdate::Setpoint { volts: setpoint })
        }
        CAN_ID_FREQUENCY if frame.len >= 2 => {
            let hz = u16::from_be_bytes([frame.data[0], frame.data[1]]) as f64 / 100.0;
            Some(InverterUpdate::Frequency { hz })
        }
        CAN_ID_STATUS if frame.len >= 4 => {
            let bits = u32::from_be_bytes([frame.data[0], frame.data[1], frame.data[2], frame.data[3]]);
            let flags = InverterStatusFlags {
                on_relay1: bits & (1 << 0) != 0,
                on_relay2: bits & (1 << 1) != 0,
                generator_running: bits & (1 << 2) != 0,
                auto_generator: bits & (1 << 3) != 0,
                auto_load_external: bits & (1 << 4) != 0,
                auto_load_soc: bits & (1 << 5) != 0,
                ext_power_derate: bits & (1 << 6) != 0,
                ext_vf_ok: bits & (1 << 7) != 0,
                grid_down_on: bits & (1 << 8) != 0,
                error: bits & (1 << 9) != 0,
                running: bits & (1 << 10) != 0,
                battery_fan: bits & (1 << 11) != 0,
                overload: bits & (1 << 12) != 0,
                external_source_connected: bits & (1 << 13) != 0,
                silent: bits & (1 << 14) != 0,
            };
            let max_current_amps = frame.data.get(4).copied().unwrap_or(0) as f32;
            Some(InverterUpdate::Status { flags, max_current_amps })
        }
        other => {
            warn!(can_id = format!("{other:#05x}"), "ignoring unrecognised CAN id");
            None
        }
    }
}

#[async_trait]
pub trait CanSource: Send + Sync {
    /// Awaits the next inverter telemetry frame; never returns `Err` for a
    /// transient read — only for a hard bus failure.
    async fn recv(&mut self) -> anyhow::Result<CanFrame>;
}

#[cfg(feature = "can")]
pub struct SocketCanSource {
    socket: socketcan::tokio::CanSocket,
}

#[cfg(feature = "can")]
impl SocketCanSource {
    pub fn open(interface: &str) -> anyhow::Result<Self> {
        Ok(Self {
            socket: socketcan::tokio::CanSocket::open(interface)?,
        })
    }
}

#[cfg(feature = "can")]
#[async_trait]
impl CanSource for SocketCanSource {
    async fn recv(&mut self) -> anyhow::Result<CanFrame> {
        use futures::StreamExt;
        let frame = self.socket.next().await.ok_or_else(|| anyhow::anyhow!("CAN socket closed"))??;
        let data = frame.data();
        let mut buf = [0u8; 8];
        let len = data.len().min(8);
        buf[..len].copy_from_slice(&data[..len]);
        Ok(CanFrame { id: frame.raw_id(), data: buf, len: len as u8 })
    }
}

/// Stand-in for sites with no CAN bus wired yet, or builds without the
/// `can` feature: never resolves, so the ingest task just idles instead of
/// busy-looping.
pub struct NullCanSource;

#[async_trait]
impl CanSource for NullCanSource {
    async fn recv(&mut self) -> anyhow::Result<CanFrame> {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_battery_electrical_frame() {
        let frame = CanFrame {
            id: CAN_ID_BATTERY,
            data: [0x14, 0xE2, 0xF6, 0x1A, 0x1B, 0x58, 0, 0], // 53.30V, -25.02A, 70.00%
            len: 6,
        };
        let update = decode(&frame).unwrap();
        match update {
            InverterUpdate::BatteryElectrical { volts, amps, soc_percent } => {
                assert!((volts - 53.30).abs() < 0.01);
                assert!((amps + 25.02).abs() < 0.01);
                assert!((soc_percent - 70.00).abs() < 0.01);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn status_frame_decodes_generator_running_bit() {
        let frame = CanFrame {
            id: CAN_ID_STATUS,
            data: [0, 0, 0, 0b0000_0100, 48, 0, 0, 0],
            len: 5,
        };
        match decode(&frame).unwrap() {
            InverterUpdate::Status { flags, max_current_amps } => {
                assert!(flags.generator_running);
                assert_eq!(max_current_amps, 48.0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_id_is_ignored() {
        let frame = CanFrame { id: 0x999, data: [0; 8], len: 8 };
        assert!(decode(&frame).is_none());
    }
}
