//! HAP service types and their mapping onto host platforms

use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix shared by all Apple-defined HAP UUIDs
const HAP_BASE_UUID_SUFFIX: &str = "-0000-1000-8000-0026BB765291";

/// Normalize a HAP type to its short upper-case form
///
/// `0000003E-0000-1000-8000-0026BB765291` and `3e` both become `3E`.
/// Vendor UUIDs are returned upper-cased but otherwise untouched.
pub fn normalize_hap_type(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    let short = match upper.strip_suffix(HAP_BASE_UUID_SUFFIX) {
        Some(prefix) => prefix.to_string(),
        None if !upper.contains('-') => upper,
        None => return upper,
    };
    let trimmed = short.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Type of a HAP service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceType {
    AccessoryInformation,
    ProtocolInformation,
    Thermostat,
    OccupancySensor,
    MotionSensor,
    TemperatureSensor,
    HumiditySensor,
    Lightbulb,
    Switch,
    Outlet,
    Fan,
    /// Any service type without a dedicated variant (normalized HAP type)
    Other(String),
}

impl ServiceType {
    /// Short HAP type code
    pub fn hap_type(&self) -> &str {
        match self {
            ServiceType::AccessoryInformation => "3E",
            ServiceType::ProtocolInformation => "A2",
            ServiceType::Thermostat => "4A",
            ServiceType::OccupancySensor => "86",
            ServiceType::MotionSensor => "85",
            ServiceType::TemperatureSensor => "8A",
            ServiceType::HumiditySensor => "82",
            ServiceType::Lightbulb => "43",
            ServiceType::Switch => "49",
            ServiceType::Outlet => "47",
            ServiceType::Fan => "40",
            ServiceType::Other(code) => code,
        }
    }

    /// Parse a HAP type in short or full UUID form
    pub fn from_hap_type(raw: &str) -> Self {
        match normalize_hap_type(raw).as_str() {
            "3E" => ServiceType::AccessoryInformation,
            "A2" => ServiceType::ProtocolInformation,
            "4A" => ServiceType::Thermostat,
            "86" => ServiceType::OccupancySensor,
            "85" => ServiceType::MotionSensor,
            "8A" => ServiceType::TemperatureSensor,
            "82" => ServiceType::HumiditySensor,
            "43" => ServiceType::Lightbulb,
            "49" => ServiceType::Switch,
            "47" => ServiceType::Outlet,
            "40" => ServiceType::Fan,
            other => ServiceType::Other(other.to_string()),
        }
    }

    /// Host platform that exposes this service, if any
    ///
    /// Information services describe the accessory itself and never
    /// become entities.
    pub fn platform(&self) -> Option<&'static str> {
        match self {
            ServiceType::Thermostat => Some("climate"),
            ServiceType::OccupancySensor | ServiceType::MotionSensor => Some("binary_sensor"),
            ServiceType::TemperatureSensor | ServiceType::HumiditySensor => Some("sensor"),
            ServiceType::Lightbulb => Some("light"),
            ServiceType::Switch | ServiceType::Outlet => Some("switch"),
            ServiceType::Fan => Some("fan"),
            ServiceType::AccessoryInformation
            | ServiceType::ProtocolInformation
            | ServiceType::Other(_) => None,
        }
    }

    pub fn is_exposed(&self) -> bool {
        self.platform().is_some()
    }
}

impl From<String> for ServiceType {
    fn from(s: String) -> Self {
        Self::from_hap_type(&s)
    }
}

impl From<ServiceType> for String {
    fn from(t: ServiceType) -> String {
        t.hap_type().to_string()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hap_type())
    }
}
