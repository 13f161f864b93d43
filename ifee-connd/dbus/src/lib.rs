use async_trait::async_trait;
use zbus::{
    fdo::Result,
    interface,
    zvariant::{DeserializeDict, SerializeDict, Type},
};

pub const SERVICE: &str = "org.ifee.Connd";
pub const IFACE: &str = "org.ifee.Connd1";
pub const OBJ_PATH: &str = "/org/ifee/Connd1";

/// Operator overrides. A missing entry means "no opinion".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "a{sv}")]
pub struct ControlState {
    pub wifi: Option<bool>,
    pub modem: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "a{sv}")]
pub struct FlightStatus {
    /// Empty when no aircraft address is known.
    pub icao: String,
    pub active: bool,
    pub velocity_kt: i32,
    pub altitude_ft: i32,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[async_trait]
pub trait ConndT: 'static + Send + Sync {
    /// Merges into the current control flags, `None` leaves a flag untouched.
    async fn set_control(&self, wifi: Option<bool>, modem: Option<bool>) -> Result<()>;
    async fn control(&self) -> Result<ControlState>;
    async fn flight_state(&self) -> Result<FlightStatus>;
}

#[derive(Debug, derive_more::From)]
pub struct Connd<T>(pub T);

#[interface(
    name = "org.ifee.Connd1",
    proxy(
        default_service = "org.ifee.Connd",
        default_path = "/org/ifee/Connd1",
    )
)]
#[async_trait]
impl<T: ConndT> ConndT for Connd<T> {
    async fn set_control(&self, wifi: Option<bool>, modem: Option<bool>) -> Result<()> {
        self.0.set_control(wifi, modem).await
    }

    async fn control(&self) -> Result<ControlState> {
        self.0.control().await
    }

    async fn flight_state(&self) -> Result<FlightStatus> {
        self.0.flight_state().await
    }
}
