// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use const_oid::ObjectIdentifier;
use serde::{Deserialize, Serialize, Serializer};

use crate::asn1::Element;
use crate::error::DecodeError;

const TCG_REGISTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.18.3.1");
const SMBIOS_REGISTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.18.3.3");
const PCIE_REGISTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.18.3.4");
const STORAGE_REGISTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.18.3.5");

const OTHER: &str = "0000";
const UNKNOWN: &str = "0001";
const MID: usize = 4;

static TABLE: &str = include_str!("../../data/component-class.json");

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Types")]
    types: BTreeMap<String, String>,
}

type Registries = BTreeMap<String, BTreeMap<String, Category>>;

fn registries() -> &'static Registries {
    static REGISTRIES: OnceLock<Registries> = OnceLock::new();
    REGISTRIES.get_or_init(|| {
        serde_json::from_str(TABLE).unwrap_or_else(|e| {
            tracing::error!("component class table is unreadable: {e}");
            Registries::new()
        })
    })
}

/// Strips a `0x` or `#` prefix from a hex class value.
fn normalize(value: &str) -> String {
    if let Some(idx) = value.find('x') {
        value[idx + 1..].to_string()
    } else {
        value.replace('#', "")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Registry {
    Tcg,
    Smbios,
    Pcie,
    Storage,
    Unknown,
}

impl From<ObjectIdentifier> for Registry {
    fn from(oid: ObjectIdentifier) -> Self {
        match oid {
            TCG_REGISTRY => Self::Tcg,
            SMBIOS_REGISTRY => Self::Smbios,
            PCIE_REGISTRY => Self::Pcie,
            STORAGE_REGISTRY => Self::Storage,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcg => "TCG",
            Self::Smbios => "SMBIOS",
            Self::Pcie => "PCIE",
            Self::Storage => "STORAGE",
            Self::Unknown => "Unknown",
        })
    }
}

/// The resolved name of a component category or type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClassName {
    Named(String),
    Unknown,
    None,
    Other,
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Unknown => f.write_str("Unknown"),
            Self::None => f.write_str("None"),
            Self::Other => f.write_str("Other"),
        }
    }
}

impl Serialize for ClassName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A component's class within one of the TCG component class registries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ComponentClass {
    pub registry_oid: String,
    pub registry: Registry,
    /// The class value in hex, without any prefix.
    pub value: String,
    pub category: String,
    pub category_name: ClassName,
    pub component: String,
    pub component_name: ClassName,
}

impl ComponentClass {
    pub fn new(registry_oid: ObjectIdentifier, value: &str) -> Self {
        let value = normalize(value);
        let registry = Registry::from(registry_oid);

        let mut out = Self {
            registry_oid: registry_oid.to_string(),
            registry,
            value: value.clone(),
            category: OTHER.into(),
            category_name: ClassName::None,
            component: "None".into(),
            component_name: ClassName::Unknown,
        };

        match value.as_str() {
            OTHER => {
                out.component = OTHER.into();
                out.component_name = ClassName::Other;
            }
            UNKNOWN | "" => out.component = UNKNOWN.into(),
            v if v.len() > MID && v.is_char_boundary(MID) => {
                let (category, component) = v.split_at(MID);
                out.category = format!("{category}{OTHER}");
                out.component = format!("{OTHER}{component}");
                out.resolve(category, component);
            }
            _ => (),
        }

        out
    }

    fn resolve(&mut self, category: &str, mask: &str) {
        let categories = match registries().get(&self.registry.to_string()) {
            Some(c) => c,
            None => return,
        };

        let found = categories
            .iter()
            .find(|(_, c)| {
                normalize(&c.id)
                    .get(..MID)
                    .map_or(false, |id| id.eq_ignore_ascii_case(category))
            });

        if let Some((name, cat)) = found {
            self.category_name = ClassName::Named(name.clone());
            self.component_name = match mask {
                OTHER => ClassName::Other,
                UNKNOWN => ClassName::Unknown,
                _ => cat
                    .types
                    .iter()
                    .find(|(id, _)| normalize(id).eq_ignore_ascii_case(&self.component))
                    .map(|(_, n)| ClassName::Named(n.clone()))
                    .unwrap_or(ClassName::Unknown),
            };
        }
    }

    /// Decodes `SEQUENCE { componentClassRegistry OID, componentClassValue OCTET STRING }`.
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        match elements {
            [registry, value] => {
                let registry = registry.expect_oid("component class registry")?;
                let value = value.expect_octets("component class value")?;
                Ok(Self::new(registry, &format!("#{}", hex::encode(value))))
            }
            _ => Err(DecodeError::illegal("Component class does not have required values.")),
        }
    }
}

impl fmt::Display for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.component_name {
            ClassName::Unknown => write!(f, "{}\n{}", self.registry, self.category_name),
            _ => write!(f, "{}\n{} - {}", self.registry, self.category_name, self.component_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(TCG_REGISTRY, "0x00040002", "Modules", "SAS Bridgeboard")]
    #[case(TCG_REGISTRY, "0x00040000", "Modules", "Other")]
    #[case(TCG_REGISTRY, "0x00040001", "Modules", "Unknown")]
    #[case(TCG_REGISTRY, "0x00060015", "Memory", "DDR3 Memory")]
    #[case(TCG_REGISTRY, "0x00060001", "Memory", "Unknown")]
    #[case(TCG_REGISTRY, "#00040002", "Modules", "SAS Bridgeboard")]
    #[case(TCG_REGISTRY, "0x00040fff", "Modules", "Unknown")]
    #[case(TCG_REGISTRY, "0x99990002", "None", "Unknown")]
    #[case(TCG_REGISTRY, "0001", "None", "Unknown")]
    #[case(TCG_REGISTRY, "", "None", "Unknown")]
    #[case(TCG_REGISTRY, "0000", "None", "Other")]
    #[case(SMBIOS_REGISTRY, "0x00040003", "Processor", "Central Processor")]
    fn resolves_names(
        #[case] registry: ObjectIdentifier,
        #[case] value: &str,
        #[case] category: &str,
        #[case] component: &str,
    ) {
        let class = ComponentClass::new(registry, value);
        assert_eq!(class.category_name.to_string(), category);
        assert_eq!(class.component_name.to_string(), component);
    }

    #[rstest]
    #[case(TCG_REGISTRY, Registry::Tcg, "TCG")]
    #[case(SMBIOS_REGISTRY, Registry::Smbios, "SMBIOS")]
    #[case(PCIE_REGISTRY, Registry::Pcie, "PCIE")]
    #[case(STORAGE_REGISTRY, Registry::Storage, "STORAGE")]
    #[case(ObjectIdentifier::new_unwrap("1.2.3"), Registry::Unknown, "Unknown")]
    fn registries_by_oid(
        #[case] oid: ObjectIdentifier,
        #[case] expected: Registry,
        #[case] name: &str,
    ) {
        let class = ComponentClass::new(oid, "0x00030003");
        assert_eq!(class.registry, expected);
        assert_eq!(class.registry.to_string(), name);
    }

    #[test]
    fn splits_category_and_component() {
        let class = ComponentClass::new(TCG_REGISTRY, "0x00030003");
        assert_eq!(class.value, "00030003");
        assert_eq!(class.category, "00030000");
        assert_eq!(class.component, "00000003");
        assert_eq!(class.to_string(), "TCG\nIC Boards - Motherboard");
    }
}
