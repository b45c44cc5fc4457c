//! Vehicle API client: wake/start/stop with rate-limit and hold-off
//! semantics. OAuth/token acquisition is out of scope — the access/refresh
//! pair is operator-provided and merely persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::notify::NotificationSink;

const API_DISABLE_DURATION: chrono::Duration = chrono::Duration::minutes(15);
const COMMAND_HOLD_OFF: chrono::Duration = chrono::Duration::minutes(2);
const BLOCKED_BODY: &str = "You have been temporarily blocked for making too many requests!";
const WAKE_POLL_ATTEMPTS: u32 = 10;
const WAKE_POLL_INTERVAL: Duration = Duration::from_secs(10);
const WAKE_SETTLE_DELAY: Duration = Duration::from_secs(15);

/// Token pair persisted to a single JSON file on disk; read at startup
/// and rewritten after refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFile {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expiry: DateTime<Utc>,
}

impl TokenFile {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait VehicleApiTransport: Send + Sync {
    async fn wake_up(&self, vehicle_id: &str) -> anyhow::Result<String>;
    async fn charge_start(&self, vehicle_id: &str) -> anyhow::Result<(bool, String)>;
    async fn charge_stop(&self, vehicle_id: &str) -> anyhow::Result<(bool, String)>;
}

struct Inner {
    api_disabled: bool,
    api_disabled_until: Option<DateTime<Utc>>,
    hold_off_until: Option<DateTime<Utc>>,
}

pub struct VehicleApi {
    transport: Box<dyn VehicleApiTransport>,
    vehicle_id: String,
    notify: std::sync::Arc<dyn NotificationSink>,
    inner: Mutex<Inner>,
    cancel_generation: AtomicBool,
}

impl VehicleApi {
    pub fn new(
        transport: Box<dyn VehicleApiTransport>,
        vehicle_id: String,
        notify: std::sync::Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            transport,
            vehicle_id,
            notify,
            inner: Mutex::new(Inner {
                api_disabled: false,
                api_disabled_until: None,
                hold_off_until: None,
            }),
            cancel_generation: AtomicBool::new(false),
        }
    }

    fn refresh_flags(&self) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        if let Some(until) = inner.api_disabled_until {
            if now >= until {
                inner.api_disabled = false;
                inner.api_disabled_until = None;
            }
        }
        if let Some(until) = inner.hold_off_until {
            if now >= until {
                inner.hold_off_until = None;
            }
        }
    }

    pub fn is_api_disabled(&self) -> bool {
        self.refresh_flags();
        self.inner.lock().api_disabled
    }

    pub fn in_hold_off(&self) -> bool {
        self.refresh_flags();
        self.inner.lock().hold_off_until.is_some()
    }

    fn set_hold_off(&self) {
        self.inner.lock().hold_off_until = Some(Utc::now() + COMMAND_HOLD_OFF);
    }

    async fn mark_disabled_if_blocked(&self, body: &str) -> bool {
        if body.trim() == BLOCKED_BODY {
            {
                let mut inner = self.inner.lock();
                inner.api_disabled = true;
                inner.api_disabled_until = Some(Utc::now() + API_DISABLE_DURATION);
            }
            self.notify
                .alert("vehicle API blocked", "vehicle API temporarily blocked by upstream")
                .await;
            true
        } else {
            false
        }
    }

    /// Polls up to 10 times at 10s intervals for state == "online"; on
    /// success, sleeps 15s before returning true. Never propagates an
    /// error to the caller — failures go to the notification stream.
    pub async fn wake(&self) -> bool {
        if self.is_api_disabled() {
            return false;
        }
        for attempt in 0..WAKE_POLL_ATTEMPTS {
            match self.transport.wake_up(&self.vehicle_id).await {
                Ok(state) => {
                    if self.mark_disabled_if_blocked(&state).await {
                        return false;
                    }
                    if state == "online" {
                        tokio::time::sleep(WAKE_SETTLE_DELAY).await;
                        return true;
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "vehicle wake poll failed");
                }
            }
            tokio::time::sleep(WAKE_POLL_INTERVAL).await;
        }
        self.notify
            .alert("vehicle wake failed", "failed to wake vehicle before issuing a charge command")
            .await;
        false
    }

    pub async fn start(&self) -> bool {
        self.command(true).await
    }

    pub async fn stop(&self) -> bool {
        self.command(false).await
    }

    async fn command(&self, start: bool) -> bool {
        if self.is_api_disabled() {
            return false;
        }
        if self.in_hold_off() {
            // Silently accepted and discarded while in hold-off.
            return true;
        }
        if !self.wake().await {
            self.notify
                .alert("vehicle wake failed", "failed to wake vehicle before stop/start command")
                .await;
            return false;
        }
        let result = if start {
            self.transport.charge_start(&self.vehicle_id).await
        } else {
            self.transport.charge_stop(&self.vehicle_id).await
        };
        match result {
            Ok((accepted, reason)) => {
                if self.mark_disabled_if_blocked(&reason).await {
                    return false;
                }
                if accepted {
                    self.set_hold_off();
                    info!(start, "vehicle API command accepted");
                } else {
                    warn!(start, reason, "vehicle API command rejected");
                }
                accepted
            }
            Err(e) => {
                warn!(error = %e, start, "vehicle API command failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotificationSink;
    use std::sync::atomic::AtomicU32;

    struct MockTransport {
        wake_state: String,
        command_result: (bool, String),
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl VehicleApiTransport for MockTransport {
        async fn wake_up(&self, _id: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.wake_state.clone())
        }
        async fn charge_start(&self, _id: &str) -> anyhow::Result<(bool, String)> {
            Ok(self.command_result.clone())
        }
        async fn charge_stop(&self, _id: &str) -> anyhow::Result<(bool, String)> {
            Ok(self.command_result.clone())
        }
    }

    fn api(transport: MockTransport) -> VehicleApi {
        VehicleApi::new(
            Box::new(transport),
            "123".to_string(),
            std::sync::Arc::new(NoopNotificationSink),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_body_disables_api_for_fifteen_minutes() {
        let transport = MockTransport {
            wake_state: BLOCKED_BODY.to_string(),
            command_result: (true, String::new()),
            calls: AtomicU32::new(0),
        };
        let vapi = api(transport);
        assert!(!vapi.wake().await);
        assert!(vapi.is_api_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_stop_sets_hold_off_then_silently_accepts_next() {
        let transport = MockTransport {
            wake_state: "online".to_string(),
            command_result: (true, String::new()),
            calls: AtomicU32::new(0),
        };
        let vapi = api(transport);
        assert!(vapi.stop().await);
        // second call lands inside the hold-off window and is swallowed.
        assert!(vapi.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command_returns_false() {
        let transport = MockTransport {
            wake_state: "online".to_string(),
            command_result: (false, "busy".to_string()),
            calls: AtomicU32::new(0),
        };
        let vapi = api(transport);
        assert!(!vapi.start().await);
    }
}
