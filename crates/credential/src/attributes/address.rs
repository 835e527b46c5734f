// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use const_oid::ObjectIdentifier;
use serde::Serialize;

use crate::asn1::Element;
use crate::error::DecodeError;

const ETHERNET_MAC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.17.1");
const WLAN_MAC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.17.2");
const BLUETOOTH_MAC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.17.3");

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AddressType {
    Ethernet,
    Wlan,
    Bluetooth,
    Unknown,
}

impl From<ObjectIdentifier> for AddressType {
    fn from(oid: ObjectIdentifier) -> Self {
        match oid {
            ETHERNET_MAC => Self::Ethernet,
            WLAN_MAC => Self::Wlan,
            BLUETOOTH_MAC => Self::Bluetooth,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ethernet => "ethernet mac",
            Self::Wlan => "wlan mac",
            Self::Bluetooth => "bluetooth mac",
            Self::Unknown => "unknown mac",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ComponentAddress {
    pub address_type: AddressType,
    pub address_type_oid: String,
    pub value: String,
}

impl ComponentAddress {
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        match elements {
            [kind, value] => {
                let oid = kind.expect_oid("component address type")?;
                Ok(Self {
                    address_type: oid.into(),
                    address_type_oid: oid.to_string(),
                    value: value.expect_utf8("component address value")?.to_string(),
                })
            }
            _ => Err(DecodeError::illegal("Component address does not have required values.")),
        }
    }
}
