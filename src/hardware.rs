use serde::{ser::SerializeStruct, Deserialize, Deserializer, Serialize, Serializer};

use std::fmt;

use crate::response::{CLOSE_BRACE, OPEN_BRACE};

pub const ENV_BILL_ACCEPTOR_DEVICE: &str = "KIOSK_BILL_ACCEPTOR_TTY";
pub const ENV_BILL_DISPENSER_DEVICE: &str = "KIOSK_BILL_DISPENSER_TTY";
pub const ENV_COIN_ACCEPTOR_DEVICE: &str = "KIOSK_COIN_ACCEPTOR_TTY";
pub const ENV_COIN_HOPPER_DEVICE: &str = "KIOSK_COIN_HOPPER_TTY";

pub const DEFAULT_BILL_ACCEPTOR_DEV_PATH: &str = "/dev/ttyBillAcceptor";
pub const DEFAULT_BILL_DISPENSER_DEV_PATH: &str = "/dev/ttyBillDispenser";
pub const DEFAULT_COIN_ACCEPTOR_DEV_PATH: &str = "/dev/ttyCoinAcceptor";
pub const DEFAULT_COIN_HOPPER_DEV_PATH: &str = "/dev/ttyCoinHopper";

/// The fixed set of serial peripherals the core coordinates.
///
/// The device set is fixed at initialization; there is no support for
/// plugging devices in at runtime.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum HardwareComponent {
    /// CCNET bill validator
    BillAcceptor,
    /// LCDM-2000 dual-cassette bill dispenser
    BillDispenser,
    /// ccTalk coin acceptor
    CoinAcceptor,
    /// SSP/eSSP coin hopper
    CoinHopper,
}

impl HardwareComponent {
    pub const fn default() -> Self {
        Self::BillAcceptor
    }

    pub const fn all() -> [Self; 4] {
        [
            Self::BillAcceptor,
            Self::BillDispenser,
            Self::CoinAcceptor,
            Self::CoinHopper,
        ]
    }
}

impl From<HardwareComponent> for &'static str {
    fn from(h: HardwareComponent) -> Self {
        match h {
            HardwareComponent::BillAcceptor => "BillAcceptor",
            HardwareComponent::BillDispenser => "BillDispenser",
            HardwareComponent::CoinAcceptor => "CoinAcceptor",
            HardwareComponent::CoinHopper => "CoinHopper",
        }
    }
}

impl From<&HardwareComponent> for &'static str {
    fn from(h: &HardwareComponent) -> Self {
        (*h).into()
    }
}

impl fmt::Display for HardwareComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", <&'static str>::from(self))
    }
}

/// Coarse health of a hardware component, as surfaced to the command channel.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HardwareState {
    /// Connected and responding normally
    OK,
    /// Not connected, or not yet initialized
    Missing,
    /// Connected, but reporting a recoverable condition (cassette low, cheated)
    Warning,
    /// Connected, but reporting a fault that blocks further operation
    Error,
}

impl HardwareState {
    pub const fn default() -> Self {
        Self::Missing
    }
}

impl Serialize for HardwareState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match *self {
            Self::OK => serializer.serialize_unit_variant("HardwareState", 0, "OK"),
            Self::Missing => serializer.serialize_unit_variant("HardwareState", 1, "MISSING"),
            Self::Warning => serializer.serialize_unit_variant("HardwareState", 2, "WARNING"),
            Self::Error => serializer.serialize_unit_variant("HardwareState", 3, "ERROR"),
        }
    }
}

impl From<HardwareState> for &'static str {
    fn from(h: HardwareState) -> Self {
        match h {
            HardwareState::OK => "OK",
            HardwareState::Missing => "MISSING",
            HardwareState::Warning => "WARNING",
            HardwareState::Error => "ERROR",
        }
    }
}

impl<'de> Deserialize<'de> for HardwareState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_uppercase().as_str() {
            "OK" => Ok(Self::OK),
            "MISSING" => Ok(Self::Missing),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            other => Err(serde::de::Error::custom(format!("unknown hardware state: {other}"))),
        }
    }
}

impl From<&HardwareState> for &'static str {
    fn from(h: &HardwareState) -> Self {
        (*h).into()
    }
}

impl fmt::Display for HardwareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", <&'static str>::from(self))
    }
}

/// Detail payload reported alongside [`HardwareState`] for status queries.
///
/// Only the fields relevant to the component in question are populated; the
/// rest are left `None` so the command-channel JSON stays compact.
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct HardwareStatusDetails {
    firmware_version: Option<String>,
    bill_count: Option<u32>,
    max_bill_count: Option<u32>,
    upper_count: Option<u32>,
    lower_count: Option<u32>,
    jammed: Option<bool>,
    cashbox_removed: Option<bool>,
}

impl HardwareStatusDetails {
    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    pub fn with_bill_count(mut self, count: u32) -> Self {
        self.bill_count = Some(count);
        self
    }

    pub fn with_max_bill_count(mut self, count: u32) -> Self {
        self.max_bill_count = Some(count);
        self
    }

    pub fn with_upper_count(mut self, count: u32) -> Self {
        self.upper_count = Some(count);
        self
    }

    pub fn with_lower_count(mut self, count: u32) -> Self {
        self.lower_count = Some(count);
        self
    }

    pub fn with_jammed(mut self, jammed: bool) -> Self {
        self.jammed = Some(jammed);
        self
    }

    pub fn with_cashbox_removed(mut self, removed: bool) -> Self {
        self.cashbox_removed = Some(removed);
        self
    }

    pub fn jammed(&self) -> bool {
        self.jammed.unwrap_or(false)
    }

    pub fn cashbox_removed(&self) -> bool {
        self.cashbox_removed.unwrap_or(false)
    }
}

impl fmt::Display for HardwareStatusDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{OPEN_BRACE}")?;
        let mut wrote = false;
        macro_rules! field {
            ($name:literal, $val:expr) => {
                if let Some(v) = $val {
                    if wrote {
                        write!(f, ",")?;
                    }
                    write!(f, "\"{}\":{}", $name, v)?;
                    wrote = true;
                }
            };
        }
        if let Some(v) = self.firmware_version.as_ref() {
            if wrote {
                write!(f, ",")?;
            }
            write!(f, "\"firmware_version\":\"{v}\"")?;
            wrote = true;
        }
        field!("bill_count", self.bill_count);
        field!("max_bill_count", self.max_bill_count);
        field!("upper_count", self.upper_count);
        field!("lower_count", self.lower_count);
        field!("jammed", self.jammed);
        field!("cashbox_removed", self.cashbox_removed);
        write!(f, "{CLOSE_BRACE}")
    }
}

impl Serialize for HardwareStatusDetails {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("HardwareStatusDetails", 7)?;
        s.serialize_field("firmware_version", &self.firmware_version)?;
        s.serialize_field("bill_count", &self.bill_count)?;
        s.serialize_field("max_bill_count", &self.max_bill_count)?;
        s.serialize_field("upper_count", &self.upper_count)?;
        s.serialize_field("lower_count", &self.lower_count)?;
        s.serialize_field("jammed", &self.jammed)?;
        s.serialize_field("cashbox_removed", &self.cashbox_removed)?;
        s.end()
    }
}

/// Status of a single hardware component, as returned by the `*_status`
/// command-channel operations.
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HardwareStatus {
    component: HardwareComponent,
    state: HardwareState,
    description: String,
    details: HardwareStatusDetails,
}

impl HardwareStatus {
    pub fn new(
        component: HardwareComponent,
        state: HardwareState,
        description: impl Into<String>,
        details: HardwareStatusDetails,
    ) -> Self {
        Self {
            component,
            state,
            description: description.into(),
            details,
        }
    }

    pub fn component(&self) -> HardwareComponent {
        self.component
    }

    pub fn state(&self) -> HardwareState {
        self.state
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn details(&self) -> &HardwareStatusDetails {
        &self.details
    }
}

impl fmt::Display for HardwareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{OPEN_BRACE}\"component\":\"{}\",\"state\":{},\"description\":\"{}\",\"details\":{}{CLOSE_BRACE}",
            self.component, self.state, self.description, self.details
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_state_serializes_uppercase() {
        let s = serde_json::to_string(&HardwareState::OK).unwrap();
        assert_eq!(s, "\"OK\"");
    }

    #[test]
    fn hardware_status_display_includes_component() {
        let status = HardwareStatus::new(
            HardwareComponent::BillAcceptor,
            HardwareState::OK,
            "connected",
            HardwareStatusDetails::default().with_bill_count(3),
        );
        let rendered = format!("{status}");
        assert!(rendered.contains("BillAcceptor"));
        assert!(rendered.contains("bill_count"));
    }
}
