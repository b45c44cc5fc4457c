//! Builds the concrete actuator/sensor backends the controller talks to,
//! switching between real hardware and simulated stand-ins: try the real
//! backend, fall back to a logged no-op/simulated one rather than failing
//! startup outright.

use crate::domain::types::ElectrolyserStatus;
use crate::domain::{ElectrolyserClient, VehicleApiTransport};
use crate::hardware::gpio::{build_heater_gpio, HeaterGpio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareMode {
    /// No GPIO/CAN/serial side effects; HTTP clients still real unless a
    /// base URL is unset.
    Simulated,
    Real,
}

/// Bundle of actuator/sensor handles assembled once at startup and shared
/// with the controller tasks via `AppState`.
pub struct SiteHardware {
    pub heater_gpio: Box<dyn HeaterGpio>,
    pub electrolyser_client: Box<dyn ElectrolyserClient>,
    pub vehicle_transport: Box<dyn VehicleApiTransport>,
    pub vehicle_id: String,
    pub http: reqwest::Client,
}

impl SiteHardware {
    /// `access_token` is the persisted, operator-provided OAuth bearer
    /// token; it's applied to the vehicle transport here, before the single
    /// account lookup that resolves the vehicle id the rest of the
    /// controller dispatches by.
    pub async fn build(
        mode: HardwareMode,
        heater_element_pins: Vec<u8>,
        heater_pump_pin: u8,
        electrolyser_base_url: String,
        vehicle_base_url: String,
        access_token: String,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let heater_gpio = match mode {
            HardwareMode::Real => build_heater_gpio(heater_element_pins, heater_pump_pin),
            HardwareMode::Simulated => Box::new(crate::hardware::gpio::NullHeaterGpio),
        };

        let vehicle_transport = HttpVehicleTransport::new(http.clone(), vehicle_base_url);
        vehicle_transport.set_token(access_token);
        let vehicle_id = vehicle_transport.fetch_vehicle_id().await?;

        Ok(Self {
            heater_gpio,
            electrolyser_client: Box::new(HttpElectrolyserClient::new(http.clone(), electrolyser_base_url)),
            vehicle_transport: Box::new(vehicle_transport),
            vehicle_id,
            http,
        })
    }
}

/// Electrolyser HTTP control surface: a single device reachable over
/// plain HTTP on the site LAN, no auth.
pub struct HttpElectrolyserClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpElectrolyserClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[derive(serde::Deserialize)]
struct ElectrolyserStatusResponse {
    rate: u8,
    gas: f64,
    #[serde(rename = "Status")]
    status: String,
}

#[async_trait::async_trait]
impl ElectrolyserClient for HttpElectrolyserClient {
    async fn get_rate(&self) -> anyhow::Result<(u8, f64, ElectrolyserStatus)> {
        let resp: ElectrolyserStatusResponse = self
            .http
            .get(format!("{}/el/getRate", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        let status = ElectrolyserStatus::parse(&resp.status)
            .ok_or_else(|| anyhow::anyhow!("unrecognised electrolyser status {:?}", resp.status))?;
        Ok((resp.rate, resp.gas, status))
    }

    async fn set_rate(&self, rate: u8) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/el/setrate", self.base_url))
            .json(&serde_json::json!({ "rate": rate }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn on(&self) -> anyhow::Result<()> {
        self.http.post(format!("{}/el/on", self.base_url)).send().await?.error_for_status()?;
        Ok(())
    }

    async fn off(&self) -> anyhow::Result<()> {
        self.http.post(format!("{}/el/off", self.base_url)).send().await?.error_for_status()?;
        Ok(())
    }

    async fn preheat(&self) -> anyhow::Result<()> {
        self.http.post(format!("{}/el/preheat", self.base_url)).send().await?.error_for_status()?;
        Ok(())
    }
}

/// Vehicle API HTTP transport. Token acquisition is out of scope; the
/// bearer token is whatever the coordinator last loaded from the
/// persisted token file, swapped in via `set_token`.
pub struct HttpVehicleTransport {
    http: reqwest::Client,
    base_url: String,
    token: parking_lot::Mutex<String>,
}

#[derive(serde::Deserialize)]
struct VehicleListEntry {
    id: u64,
}

impl HttpVehicleTransport {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url, token: parking_lot::Mutex::new(String::new()) }
    }

    pub fn set_token(&self, access_token: String) {
        *self.token.lock() = access_token;
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token.lock())
    }

    /// Looks up the first vehicle on the account: the core only ever
    /// drives a single vehicle.
    pub async fn fetch_vehicle_id(&self) -> anyhow::Result<String> {
        let vehicles: Vec<VehicleListEntry> = self
            .http
            .get(format!("{}/api/1/vehicles", self.base_url))
            .header("Authorization", self.bearer())
            .send()
            .await?
            .json()
            .await?;
        let first = vehicles.first().ok_or_else(|| anyhow::anyhow!("no vehicles on account"))?;
        Ok(first.id.to_string())
    }
}

#[derive(serde::Deserialize)]
struct WakeResponse {
    response: WakeState,
}

#[derive(serde::Deserialize)]
struct WakeState {
    state: String,
}

#[derive(serde::Deserialize)]
struct CommandEnvelope {
    response: CommandResult,
}

#[derive(serde::Deserialize)]
struct CommandResult {
    result: bool,
    #[serde(default)]
    reason: String,
}

impl HttpVehicleTransport {
    async fn command(&self, vehicle_id: &str, path: &str) -> anyhow::Result<(bool, String)> {
        let resp = self
            .http
            .post(format!("{}/api/1/vehicles/{vehicle_id}/command/{path}", self.base_url))
            .header("Authorization", self.bearer())
            .send()
            .await?;
        let body = resp.text().await?;
        match serde_json::from_str::<CommandEnvelope>(&body) {
            Ok(parsed) => Ok((parsed.response.result, parsed.response.reason)),
            Err(_) => Ok((false, body)),
        }
    }
}

#[async_trait::async_trait]
impl VehicleApiTransport for HttpVehicleTransport {
    async fn wake_up(&self, vehicle_id: &str) -> anyhow::Result<String> {
        let resp = self
            .http
            .post(format!("{}/api/1/vehicles/{vehicle_id}/wake_up", self.base_url))
            .header("Authorization", self.bearer())
            .send()
            .await?;
        let body = resp.text().await?;
        match serde_json::from_str::<WakeResponse>(&body) {
            Ok(parsed) => Ok(parsed.response.state),
            Err(_) => Ok(body),
        }
    }

    async fn charge_start(&self, vehicle_id: &str) -> anyhow::Result<(bool, String)> {
        self.command(vehicle_id, "charge_start").await
    }

    async fn charge_stop(&self, vehicle_id: &str) -> anyhow::Result<(bool, String)> {
        self.command(vehicle_id, "charge_stop").await
    }
}
