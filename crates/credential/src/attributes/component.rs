// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use super::{pick, AttributeStatus, ComponentAddress, ComponentClass, UriReference, NOT_SPECIFIED};
use crate::asn1::{Element, Tagged};
use crate::error::DecodeError;
use crate::name;

/// Upper bound on the entries of any configuration list.
pub const CONFIGMAX: usize = 32;

const SERIAL: u8 = 0;
const REVISION: u8 = 1;
const MANUFACTURER_ID: u8 = 2;
const FIELD_REPLACEABLE: u8 = 3;
const ADDRESSES: u8 = 4;
const CERTIFICATE_IDENTIFIER: u8 = 5;
const PLATFORM_URI: u8 = 6;
const STATUS: u8 = 7;

const ATTRIBUTE_CERT_IDENTIFIER: u8 = 0;
const GENERIC_CERT_IDENTIFIER: u8 = 1;

const INVALID_TAG: &str = "Component identifier contains invalid tagged object.";

/// Points at the certificate that describes a component in more detail.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CertificateIdentifier {
    pub hash_algorithm: Option<String>,
    /// Hex encoded hash over the referenced certificate's signature.
    pub hash_over_signature: Option<String>,
    pub issuer: Option<String>,
    pub serial: Option<String>,
}

impl CertificateIdentifier {
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let mut out = Self::default();

        for element in elements {
            let tagged = element
                .as_tagged()
                .ok_or(DecodeError::UnrecognizedTaggedObject(INVALID_TAG))?;

            let inner = tagged.unwrap_lenient()?;
            let fields = inner.expect_sequence("certificate identifier")?;

            match (tagged.number, fields) {
                (ATTRIBUTE_CERT_IDENTIFIER, [algorithm, hash, ..]) => {
                    out.hash_algorithm = algorithm
                        .expect_sequence("hash algorithm")?
                        .first()
                        .and_then(Element::as_oid)
                        .map(|o| o.to_string());
                    out.hash_over_signature = Some(hex::encode(hash.expect_octets("hash over signature")?));
                }
                (GENERIC_CERT_IDENTIFIER, [issuer, serial, ..]) => {
                    out.issuer = name::general_names(issuer.expect_sequence("issuer")?)?;
                    out.serial = match serial {
                        Element::Integer(i) => Some(i.to_unsigned().to_string()),
                        other => {
                            return Err(DecodeError::illegal(format!(
                                "certificate serial: expected INTEGER, found {}",
                                other.kind()
                            )))
                        }
                    };
                }
                (ATTRIBUTE_CERT_IDENTIFIER | GENERIC_CERT_IDENTIFIER, _) => {
                    return Err(DecodeError::illegal(
                        "Certificate identifier does not have required values.",
                    ))
                }
                _ => return Err(DecodeError::UnrecognizedTaggedObject(INVALID_TAG)),
            }
        }

        Ok(out)
    }
}

/// A hardware or firmware component listed in a platform credential.
///
/// Version 1.2 credentials only carry the first group of fields. Version
/// 2.0 credentials add the component class, a certificate reference, a
/// platform URI and, in delta credentials, the change status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ComponentIdentifier {
    pub component_class: Option<ComponentClass>,
    pub manufacturer: String,
    pub model: String,
    pub serial: Option<String>,
    pub revision: Option<String>,
    pub manufacturer_id: Option<String>,
    pub field_replaceable: Option<bool>,
    pub addresses: Vec<ComponentAddress>,
    pub certificate_identifier: Option<CertificateIdentifier>,
    pub platform_uri: Option<UriReference>,
    pub status: Option<AttributeStatus>,
}

fn addresses(tagged: &Tagged<'_>) -> Result<Vec<ComponentAddress>, DecodeError> {
    let elements = tagged.implicit_sequence()?;
    if elements.len() > CONFIGMAX {
        return Err(DecodeError::illegal(
            "Component identifier contains invalid number of component addresses.",
        ));
    }

    elements
        .iter()
        .map(|e| ComponentAddress::from_sequence(e.expect_sequence("component address")?))
        .collect()
}

impl ComponentIdentifier {
    /// Decodes the version 1.2 layout: manufacturer, model, then tags 0 to 4.
    pub fn from_sequence_v1(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let (manufacturer, model, rest) = match elements {
            [manufacturer, model, rest @ ..] => (manufacturer, model, rest),
            _ => return Err(DecodeError::illegal("Component identifier do not have required values.")),
        };

        let mut out = Self {
            manufacturer: manufacturer.expect_utf8("component manufacturer")?.to_string(),
            model: model.expect_utf8("component model")?.to_string(),
            ..Default::default()
        };

        for element in rest {
            let tagged = element
                .as_tagged()
                .ok_or(DecodeError::UnrecognizedTaggedObject(INVALID_TAG))?;
            if !out.common_field(tagged)? {
                return Err(DecodeError::UnrecognizedTaggedObject(INVALID_TAG));
            }
        }

        Ok(out)
    }

    /// Decodes the version 2.0 layout, which leads with the component class.
    pub fn from_sequence_v2(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let (class, manufacturer, model, rest) = match elements {
            [class, manufacturer, model, rest @ ..] => (class, manufacturer, model, rest),
            _ => return Err(DecodeError::illegal("Component identifier do not have required values.")),
        };

        let mut out = Self {
            component_class: Some(ComponentClass::from_sequence(
                class.expect_sequence("component class")?,
            )?),
            manufacturer: manufacturer.expect_utf8("component manufacturer")?.to_string(),
            model: model.expect_utf8("component model")?.to_string(),
            ..Default::default()
        };

        for element in rest {
            let tagged = element
                .as_tagged()
                .ok_or(DecodeError::UnrecognizedTaggedObject(INVALID_TAG))?;
            if out.common_field(tagged)? {
                continue;
            }

            match tagged.number {
                CERTIFICATE_IDENTIFIER => {
                    out.certificate_identifier =
                        Some(CertificateIdentifier::from_sequence(&tagged.implicit_sequence()?)?);
                }
                PLATFORM_URI => {
                    out.platform_uri = Some(UriReference::from_sequence(&tagged.implicit_sequence()?)?);
                }
                STATUS => {
                    let value = tagged.implicit_enumerated()?;
                    out.status = Some(pick(
                        &[
                            AttributeStatus::Added,
                            AttributeStatus::Modified,
                            AttributeStatus::Removed,
                        ],
                        value,
                        "attribute status",
                    )?);
                }
                _ => return Err(DecodeError::UnrecognizedTaggedObject(INVALID_TAG)),
            }
        }

        Ok(out)
    }

    /// Applies one of the tags shared by both layouts. Returns false for
    /// any other tag.
    fn common_field(&mut self, tagged: &Tagged<'_>) -> Result<bool, DecodeError> {
        match tagged.number {
            SERIAL => self.serial = Some(tagged.implicit_utf8()?.to_string()),
            REVISION => self.revision = Some(tagged.implicit_utf8()?.to_string()),
            MANUFACTURER_ID => self.manufacturer_id = Some(tagged.implicit_oid()?.to_string()),
            FIELD_REPLACEABLE => self.field_replaceable = Some(tagged.implicit_bool()?),
            ADDRESSES => self.addresses = addresses(tagged)?,
            _ => return Ok(false),
        }

        Ok(true)
    }

    pub fn is_version2(&self) -> bool {
        self.component_class.is_some()
    }

    pub fn is_added(&self) -> bool {
        self.status == Some(AttributeStatus::Added)
    }

    pub fn is_modified(&self) -> bool {
        self.status == Some(AttributeStatus::Modified)
    }

    pub fn is_removed(&self) -> bool {
        self.status == Some(AttributeStatus::Removed)
    }

    /// True when no change status applies to this component.
    pub fn is_empty(&self) -> bool {
        matches!(self.status, None | Some(AttributeStatus::NotSpecified))
    }

    pub fn has_serial(&self) -> bool {
        matches!(self.serial.as_deref(), Some(s) if !s.trim().is_empty() && s != NOT_SPECIFIED)
    }

    pub fn has_revision(&self) -> bool {
        matches!(self.revision.as_deref(), Some(s) if !s.trim().is_empty() && s != NOT_SPECIFIED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::{self, tests::*};
    use crate::attributes::{AddressType, ClassName};

    use const_oid::ObjectIdentifier;
    use rstest::rstest;

    fn v1(der: &[u8]) -> Result<ComponentIdentifier, DecodeError> {
        let parsed = asn1::parse(der).unwrap();
        ComponentIdentifier::from_sequence_v1(parsed.as_sequence().unwrap())
    }

    fn v2(der: &[u8]) -> Result<ComponentIdentifier, DecodeError> {
        let parsed = asn1::parse(der).unwrap();
        ComponentIdentifier::from_sequence_v2(parsed.as_sequence().unwrap())
    }

    fn class(value: &[u8]) -> Vec<u8> {
        seq(&[oid("2.23.133.18.3.1"), octets(value)])
    }

    fn address() -> Vec<u8> {
        seq(&[oid("2.23.133.17.1"), utf8("00:11:22:33:44:55")])
    }

    #[test]
    fn v1_with_every_field() {
        let der = seq(&[
            utf8("Intel"),
            utf8("Ethernet I219"),
            implicit(0, b"SN-1"),
            implicit(1, b"rev-a"),
            implicit(2, ObjectIdentifier::new_unwrap("1.3.6.1.4.1.343").as_bytes()),
            implicit(3, &[0xff]),
            constructed(4, &address()),
        ]);

        let component = v1(&der).unwrap();
        assert_eq!(component.manufacturer, "Intel");
        assert_eq!(component.model, "Ethernet I219");
        assert_eq!(component.serial.as_deref(), Some("SN-1"));
        assert_eq!(component.revision.as_deref(), Some("rev-a"));
        assert_eq!(component.manufacturer_id.as_deref(), Some("1.3.6.1.4.1.343"));
        assert_eq!(component.field_replaceable, Some(true));
        assert_eq!(component.addresses[0].address_type, AddressType::Ethernet);
        assert!(!component.is_version2());
        assert!(component.is_empty());
    }

    #[test]
    fn v1_defaults() {
        let component = v1(&seq(&[utf8("Intel"), utf8("Core i7")])).unwrap();
        assert_eq!(component.serial, None);
        assert_eq!(component.revision, None);
        assert!(component.addresses.is_empty());
        assert!(!component.has_serial());
    }

    #[test]
    fn v1_rejects_v2_tags() {
        let der = seq(&[utf8("Intel"), utf8("Core i7"), implicit(7, &[0])]);
        assert!(matches!(v1(&der), Err(DecodeError::UnrecognizedTaggedObject(..))));
    }

    #[test]
    fn too_few_values() {
        assert!(v1(&seq(&[utf8("Intel")])).is_err());
        assert!(v2(&seq(&[class(&[0, 4, 0, 2]), utf8("Intel")])).is_err());
    }

    #[test]
    fn too_many_addresses() {
        let body: Vec<u8> = (0..=CONFIGMAX).flat_map(|_| address()).collect();
        let der = seq(&[utf8("Intel"), utf8("NIC"), constructed(4, &body)]);
        let err = v1(&der).unwrap_err();
        assert!(err.to_string().contains("invalid number of component addresses"), "{err}");
    }

    #[test]
    fn v2_with_class_and_status() {
        let der = seq(&[
            class(&[0x00, 0x04, 0x00, 0x02]),
            utf8("Broadcom"),
            utf8("SAS3008"),
            implicit(0, b"SB-7"),
            implicit(7, &[1]),
        ]);

        let component = v2(&der).unwrap();
        let class = component.component_class.as_ref().unwrap();
        assert_eq!(class.value, "00040002");
        assert_eq!(class.category_name, ClassName::Named("Modules".into()));
        assert!(component.is_version2());
        assert!(component.is_modified());
        assert!(!component.is_empty());
        assert!(component.has_serial());
    }

    #[test]
    fn v2_certificate_identifier() {
        let directory = constructed(4, &seq(&[set(&[seq(&[oid("2.5.4.3"), utf8("Component CA")])])]));
        let identifier = [
            constructed(0, &[seq(&[oid("2.16.840.1.101.3.4.2.1")]), octets(&[0xab, 0xcd])].concat()),
            constructed(1, &[seq(&[directory]), int(9)].concat()),
        ]
        .concat();
        let der = seq(&[class(&[0, 6, 0, 0x15]), utf8("Samsung"), utf8("M393"), constructed(5, &identifier)]);

        let component = v2(&der).unwrap();
        let id = component.certificate_identifier.unwrap();
        assert_eq!(id.hash_algorithm.as_deref(), Some("2.16.840.1.101.3.4.2.1"));
        assert_eq!(id.hash_over_signature.as_deref(), Some("abcd"));
        assert!(id.issuer.unwrap().ends_with("=Component CA"));
        assert_eq!(id.serial.as_deref(), Some("9"));
    }

    #[rstest]
    #[case(0, Some(AttributeStatus::Added))]
    #[case(1, Some(AttributeStatus::Modified))]
    #[case(2, Some(AttributeStatus::Removed))]
    #[case(3, None)]
    fn v2_status_range(#[case] value: u8, #[case] expected: Option<AttributeStatus>) {
        let der = seq(&[class(&[0, 1, 0, 2]), utf8("AMD"), utf8("EPYC"), implicit(7, &[value])]);
        match expected {
            Some(status) => assert_eq!(v2(&der).unwrap().status, Some(status)),
            None => assert!(matches!(v2(&der), Err(DecodeError::InvalidEnumValue(..)))),
        }
    }

    #[test]
    fn v2_unknown_tag() {
        let der = seq(&[class(&[0, 1, 0, 2]), utf8("AMD"), utf8("EPYC"), implicit(9, &[0])]);
        assert!(matches!(v2(&der), Err(DecodeError::UnrecognizedTaggedObject(..))));
    }
}
