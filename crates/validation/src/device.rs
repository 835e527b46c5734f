// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! The inventory a device reports about itself.

use serde::{Deserialize, Serialize};

/// Placeholder firmware writes into serial number fields it does not know.
pub const NOT_SPECIFIED: &str = "Not Specified";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceInfo {
    pub name: String,

    #[serde(default)]
    pub hardware: HardwareInfo,

    #[serde(default)]
    pub components: Vec<ComponentInfo>,
}

/// Values read from the SMBIOS system, baseboard and chassis tables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareInfo {
    #[serde(default)]
    pub manufacturer: String,

    #[serde(default)]
    pub product_name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub system_serial_number: String,

    #[serde(default)]
    pub baseboard_serial_number: String,

    #[serde(default)]
    pub chassis_serial_number: String,
}

impl HardwareInfo {
    /// The serial numbers that were actually collected, labelled.
    pub fn serial_numbers(&self) -> Vec<(&'static str, &str)> {
        [
            ("board serial number", &self.baseboard_serial_number),
            ("chassis serial number", &self.chassis_serial_number),
            ("system serial number", &self.system_serial_number),
        ]
        .into_iter()
        .filter(|(_, serial)| is_specified(serial))
        .map(|(label, serial)| (label, serial.as_str()))
        .collect()
    }
}

/// One piece of hardware found on the device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentInfo {
    /// Hex value of the component class, as registered by the TCG.
    #[serde(default)]
    pub component_class: String,

    pub manufacturer: String,

    pub model: String,

    #[serde(default)]
    pub serial: Option<String>,

    #[serde(default)]
    pub revision: Option<String>,
}

/// False for empty values and the firmware placeholder.
pub fn is_specified(value: &str) -> bool {
    !value.trim().is_empty() && !value.trim().eq_ignore_ascii_case(NOT_SPECIFIED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_toml() {
        let raw = r#"
        name = "server-01"

        [hardware]
        manufacturer = "Example Inc."
        product_name = "Example Server"
        baseboard_serial_number = "BOARD-1"
        chassis_serial_number = "Not Specified"

        [[components]]
        component_class = "00030003"
        manufacturer = "Intel"
        model = "Xeon"
        serial = "CPU-1"
        "#;

        let device: DeviceInfo = toml::from_str(raw).unwrap();
        assert_eq!(device.name, "server-01");
        assert_eq!(device.hardware.version, "");
        assert_eq!(device.components.len(), 1);
        assert_eq!(device.components[0].serial.as_deref(), Some("CPU-1"));
        assert!(device.components[0].revision.is_none());
        assert_eq!(device.hardware.serial_numbers(), vec![("board serial number", "BOARD-1")]);
    }

    #[test]
    fn from_json() {
        let raw = r#"{"name": "d", "components": [{"manufacturer": "A", "model": "B"}]}"#;
        let device: DeviceInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(device.components[0].component_class, "");
        assert_eq!(device.hardware, HardwareInfo::default());
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<DeviceInfo>("name = \"d\"\nbogus = 1").is_err());
    }

    #[test]
    fn placeholders() {
        assert!(!is_specified(""));
        assert!(!is_specified("  "));
        assert!(!is_specified("not specified"));
        assert!(is_specified("S1"));
    }
}
