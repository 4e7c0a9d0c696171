//! Accessories, services and characteristics
//!
//! The serialized form is the HAP `/accessories` layout
//! (`{"aid": 1, "services": [{"iid": 1, "type": "3E", "characteristics": [...]}]}`).
//! Descriptive accessory fields (name, serial number, model, ...) are derived
//! from the accessory information service when an [`Accessory`] is built, so
//! they can never disagree with the characteristics they came from.

use serde::{Deserialize, Deserializer, Serialize};

use crate::characteristics as chars;
use crate::error::TopologyError;
use crate::service_type::{normalize_hap_type, ServiceType};

fn deserialize_hap_type<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_hap_type(&raw))
}

/// A single HAP characteristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    /// Instance id, unique within the accessory
    pub iid: u64,
    /// Normalized short HAP type
    #[serde(rename = "type", deserialize_with = "deserialize_hap_type")]
    pub char_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub perms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Characteristic {
    pub fn new(iid: u64, char_type: &str, value: impl Into<serde_json::Value>) -> Self {
        Self {
            iid,
            char_type: normalize_hap_type(char_type),
            value: Some(value.into()),
            perms: vec!["pr".to_string()],
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_perms(mut self, perms: &[&str]) -> Self {
        self.perms = perms.iter().map(|p| p.to_string()).collect();
        self
    }

    fn string_value(&self) -> Option<&str> {
        self.value.as_ref().and_then(|v| v.as_str())
    }
}

/// A HAP service: a typed group of characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Instance id (the service id used in entity unique ids)
    pub iid: u64,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(iid: u64, service_type: ServiceType) -> Self {
        Self {
            iid,
            service_type,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: Characteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// Find a characteristic by (short or full) HAP type
    pub fn characteristic(&self, char_type: &str) -> Option<&Characteristic> {
        let wanted = normalize_hap_type(char_type);
        self.characteristics.iter().find(|c| c.char_type == wanted)
    }

    fn string_value(&self, char_type: &str) -> Option<String> {
        self.characteristic(char_type)
            .and_then(Characteristic::string_value)
            .map(str::to_string)
    }
}

/// Wire form of an accessory
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAccessory {
    aid: u64,
    services: Vec<Service>,
}

/// A HAP accessory exposed by a pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAccessory", into = "RawAccessory")]
pub struct Accessory {
    pub aid: u64,
    pub name: String,
    pub serial_number: String,
    pub model: String,
    pub manufacturer: String,
    pub software_version: String,
    pub hardware_version: String,
    pub services: Vec<Service>,
}

impl Accessory {
    /// Start building an accessory with the given accessory id and serial number
    pub fn builder(aid: u64, serial_number: impl Into<String>) -> AccessoryBuilder {
        AccessoryBuilder::new(aid, serial_number)
    }

    /// Look up a service by instance id
    pub fn service(&self, iid: u64) -> Option<&Service> {
        self.services.iter().find(|s| s.iid == iid)
    }

    /// Services that are exposed as host entities
    pub fn exposed_services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter().filter(|s| s.service_type.is_exposed())
    }

    pub fn is_root(&self) -> bool {
        self.aid == crate::ROOT_AID
    }
}

impl TryFrom<RawAccessory> for Accessory {
    type Error = TopologyError;

    fn try_from(raw: RawAccessory) -> Result<Self, Self::Error> {
        let info = raw
            .services
            .iter()
            .find(|s| s.service_type == ServiceType::AccessoryInformation)
            .ok_or(TopologyError::MissingAccessoryInformation { aid: raw.aid })?;

        let serial_number = info
            .string_value(chars::SERIAL_NUMBER)
            .filter(|s| !s.is_empty())
            .ok_or(TopologyError::MissingSerialNumber { aid: raw.aid })?;

        Ok(Self {
            aid: raw.aid,
            name: info.string_value(chars::NAME).unwrap_or_default(),
            model: info.string_value(chars::MODEL).unwrap_or_default(),
            manufacturer: info.string_value(chars::MANUFACTURER).unwrap_or_default(),
            software_version: info
                .string_value(chars::FIRMWARE_REVISION)
                .unwrap_or_default(),
            hardware_version: info
                .string_value(chars::HARDWARE_REVISION)
                .unwrap_or_default(),
            serial_number,
            services: raw.services,
        })
    }
}

impl From<Accessory> for RawAccessory {
    fn from(accessory: Accessory) -> Self {
        Self {
            aid: accessory.aid,
            services: accessory.services,
        }
    }
}

/// Builder that synthesizes the accessory information service
#[derive(Debug, Clone)]
pub struct AccessoryBuilder {
    aid: u64,
    serial_number: String,
    name: String,
    model: String,
    manufacturer: String,
    software_version: String,
    hardware_version: String,
    services: Vec<Service>,
}

impl AccessoryBuilder {
    fn new(aid: u64, serial_number: impl Into<String>) -> Self {
        Self {
            aid,
            serial_number: serial_number.into(),
            name: String::new(),
            model: String::new(),
            manufacturer: String::new(),
            software_version: String::new(),
            hardware_version: String::new(),
            services: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    pub fn software_version(mut self, version: impl Into<String>) -> Self {
        self.software_version = version.into();
        self
    }

    pub fn hardware_version(mut self, version: impl Into<String>) -> Self {
        self.hardware_version = version.into();
        self
    }

    pub fn service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Build the accessory; the information service takes iid 1
    pub fn build(self) -> Result<Accessory, TopologyError> {
        let info = Service::new(1, ServiceType::AccessoryInformation)
            .with_characteristic(Characteristic::new(2, chars::IDENTIFY, false).with_perms(&["pw"]))
            .with_characteristic(Characteristic::new(3, chars::MANUFACTURER, self.manufacturer))
            .with_characteristic(Characteristic::new(4, chars::MODEL, self.model))
            .with_characteristic(Characteristic::new(5, chars::NAME, self.name))
            .with_characteristic(Characteristic::new(6, chars::SERIAL_NUMBER, self.serial_number))
            .with_characteristic(Characteristic::new(
                7,
                chars::FIRMWARE_REVISION,
                self.software_version,
            ))
            .with_characteristic(Characteristic::new(
                8,
                chars::HARDWARE_REVISION,
                self.hardware_version,
            ));

        let mut services = Vec::with_capacity(self.services.len() + 1);
        services.push(info);
        services.extend(self.services);

        Accessory::try_from(RawAccessory {
            aid: self.aid,
            services,
        })
    }
}

/// Parse a HAP accessories document
///
/// Accepts either a bare list of accessories or the `/accessories` response
/// object `{"accessories": [...]}`.
pub fn parse_accessories(json: &str) -> Result<Vec<Accessory>, TopologyError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Document {
        List(Vec<Accessory>),
        Wrapped { accessories: Vec<Accessory> },
    }

    let document: Document =
        serde_json::from_str(json).map_err(|e| TopologyError::InvalidDocument(e.to_string()))?;

    Ok(match document {
        Document::List(accessories) => accessories,
        Document::Wrapped { accessories } => accessories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn thermostat() -> Accessory {
        Accessory::builder(1, "123456789012")
            .name("HomeW")
            .model("ecobee3")
            .manufacturer("ecobee Inc.")
            .software_version("4.2.394")
            .service(
                Service::new(16, ServiceType::Thermostat)
                    .with_characteristic(Characteristic::new(19, chars::CURRENT_TEMPERATURE, 21.8)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_derives_information_fields() {
        let accessory = thermostat();
        assert_eq!(accessory.name, "HomeW");
        assert_eq!(accessory.serial_number, "123456789012");
        assert_eq!(accessory.manufacturer, "ecobee Inc.");
        assert_eq!(accessory.software_version, "4.2.394");
        assert_eq!(accessory.hardware_version, "");
        assert_eq!(accessory.services.len(), 2);
        assert!(accessory.is_root());
    }

    #[test]
    fn test_exposed_services_skip_information() {
        let accessory = thermostat();
        let exposed: Vec<u64> = accessory.exposed_services().map(|s| s.iid).collect();
        assert_eq!(exposed, vec![16]);
    }

    #[test]
    fn test_serialized_form_is_hap_layout() {
        let value = serde_json::to_value(thermostat()).unwrap();
        assert_eq!(value["aid"], 1);
        assert_eq!(value["services"][0]["type"], "3E");
        assert_eq!(value["services"][1]["iid"], 16);
        assert!(value.get("serial_number").is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let accessory = thermostat();
        let json = serde_json::to_string(&accessory).unwrap();
        let parsed: Accessory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, accessory);
    }

    #[test]
    fn test_missing_information_service() {
        let raw = json!({"aid": 3, "services": [{"iid": 8, "type": "4A", "characteristics": []}]});
        let err = serde_json::from_value::<Accessory>(raw).unwrap_err();
        assert!(err.to_string().contains("no accessory information service"));
    }

    #[test]
    fn test_missing_serial_number() {
        let raw = json!({
            "aid": 2,
            "services": [{
                "iid": 1,
                "type": "0000003E-0000-1000-8000-0026BB765291",
                "characteristics": [{"iid": 2, "type": "23", "value": "Porch"}]
            }]
        });
        let err = serde_json::from_value::<Accessory>(raw).unwrap_err();
        assert!(err.to_string().contains("no serial number"));
    }

    #[test]
    fn test_parse_accessories_both_layouts() {
        let list = serde_json::to_string(&vec![thermostat()]).unwrap();
        assert_eq!(parse_accessories(&list).unwrap().len(), 1);

        let wrapped = format!("{{\"accessories\": {list}}}");
        assert_eq!(parse_accessories(&wrapped).unwrap().len(), 1);

        assert!(matches!(
            parse_accessories("{\"nope\": 1}"),
            Err(TopologyError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_characteristic_lookup_accepts_full_uuid() {
        let accessory = thermostat();
        let service = accessory.service(16).unwrap();
        let current = service
            .characteristic("00000011-0000-1000-8000-0026BB765291")
            .unwrap();
        assert_eq!(current.iid, 19);
    }
}
