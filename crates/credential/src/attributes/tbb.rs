// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::Serialize;

use super::{pick, CommonCriteriaMeasures, FipsLevel};
use crate::asn1::{Element, Tagged};
use crate::error::DecodeError;

const CCINFO: u8 = 0;
const FIPSLEVEL: u8 = 1;
const RTMTYPE: u8 = 2;
const PLATFORM_FW_SIGNATURE_VERIFICATION: u8 = 3;
const PLATFORM_FW_UPDATE_COMPLIANCE: u8 = 4;
const FIRMWARE_CAPABILITIES: u8 = 5;
const HARDWARE_CAPABILITIES: u8 = 6;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MeasurementRootType {
    Static,
    Dynamic,
    NonHost,
    Hybrid,
    Physical,
    Virtual,
}

impl MeasurementRootType {
    const ALL: [Self; 6] = [
        Self::Static,
        Self::Dynamic,
        Self::NonHost,
        Self::Hybrid,
        Self::Physical,
        Self::Virtual,
    ];
}

impl fmt::Display for MeasurementRootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::NonHost => "nonHost",
            Self::Hybrid => "hybrid",
            Self::Physical => "physical",
            Self::Virtual => "virtual",
        })
    }
}

/// Security claims about the platform's trusted building block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct TbbSecurityAssertion {
    pub version: i64,
    pub cc_info: Option<CommonCriteriaMeasures>,
    pub fips_level: Option<FipsLevel>,
    pub rtm_type: Option<MeasurementRootType>,
    pub iso9000_certified: bool,
    pub iso9000_uri: Option<String>,
    pub platform_fw_signature_verification: Option<String>,
    pub platform_fw_update_compliance: Option<String>,
    pub firmware_capabilities: Option<String>,
    pub hardware_capabilities: Option<String>,
}

/// Capability flags arrive as BIT STRINGs, sometimes mis-encoded as OCTET STRINGs.
fn bits(tagged: &Tagged<'_>) -> Option<String> {
    match tagged.explicit() {
        Ok(Element::BitString(b)) => Some(hex::encode(b.get(1..).unwrap_or_default())),
        Ok(Element::OctetString(o)) => Some(hex::encode(o)),
        _ => Some(hex::encode(tagged.contents.get(1..).unwrap_or_default())),
    }
}

impl TbbSecurityAssertion {
    /// Untagged fields are only accepted in their schema position: a
    /// version first, then the ISO 9000 flag, then its URI. A BOOLEAN
    /// with no preceding version is therefore not taken as the flag.
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        let mut untagged = 0;

        for element in elements {
            match element {
                Element::Integer(v) if untagged == 0 => {
                    out.version = v.to_i64()?;
                    untagged += 1;
                }
                Element::Boolean(b) if untagged == 1 => {
                    out.iso9000_certified = *b;
                    untagged += 1;
                }
                Element::Ia5(uri) if untagged == 2 => {
                    out.iso9000_uri = Some(uri.to_string());
                    untagged += 1;
                }
                Element::Tagged(tagged) => match tagged.number {
                    CCINFO => {
                        let seq = tagged.implicit_sequence()?;
                        out.cc_info = Some(CommonCriteriaMeasures::from_sequence(&seq)?);
                    }
                    FIPSLEVEL => {
                        let seq = tagged.implicit_sequence()?;
                        out.fips_level = Some(FipsLevel::from_sequence(&seq)?);
                    }
                    RTMTYPE => {
                        let value = tagged.implicit_enumerated()?;
                        out.rtm_type = Some(pick(&MeasurementRootType::ALL, value, "measurement root type")?);
                    }
                    PLATFORM_FW_SIGNATURE_VERIFICATION => {
                        out.platform_fw_signature_verification = bits(tagged)
                    }
                    PLATFORM_FW_UPDATE_COMPLIANCE => out.platform_fw_update_compliance = bits(tagged),
                    FIRMWARE_CAPABILITIES => out.firmware_capabilities = bits(tagged),
                    HARDWARE_CAPABILITIES => out.hardware_capabilities = bits(tagged),
                    _ => {
                        return Err(DecodeError::UnrecognizedTaggedObject(
                            "TBB Security Assertion contains invalid tagged object.",
                        ))
                    }
                },
                _ => (),
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::{self, tests::*};
    use crate::attributes::common_criteria::tests::measures_der;

    use rstest::rstest;

    fn decode(der: &[u8]) -> Result<TbbSecurityAssertion, DecodeError> {
        let parsed = asn1::parse(der).unwrap();
        TbbSecurityAssertion::from_sequence(parsed.as_sequence().unwrap())
    }

    fn strip_header(der: Vec<u8>) -> Vec<u8> {
        asn1::parse(&der).unwrap();
        der[2..].to_vec()
    }

    #[test]
    fn empty_sequence_gives_defaults() {
        assert_eq!(decode(&seq(&[])).unwrap(), TbbSecurityAssertion::default());
    }

    #[test]
    fn full_assertion() {
        let cc = strip_header(measures_der(4));
        let fips = strip_header(seq(&[ia5("140-2"), enumerated(2)]));
        let der = seq(&[
            int(1),
            constructed(0, &cc),
            constructed(1, &fips),
            implicit(2, &[1]),
            boolean(true),
            ia5("https://example.com/iso"),
        ]);

        let tbb = decode(&der).unwrap();
        assert_eq!(tbb.version, 1);
        assert_eq!(tbb.cc_info.unwrap().assurance_level.value(), 4);
        assert_eq!(tbb.fips_level.unwrap().level.to_string(), "level 2");
        assert_eq!(tbb.rtm_type, Some(MeasurementRootType::Dynamic));
        assert!(tbb.iso9000_certified);
        assert_eq!(tbb.iso9000_uri.as_deref(), Some("https://example.com/iso"));
    }

    #[test]
    fn boolean_without_version_is_not_the_iso_flag() {
        let tbb = decode(&seq(&[boolean(true), ia5("https://example.com/iso")])).unwrap();
        assert_eq!(tbb.version, 0);
        assert!(!tbb.iso9000_certified);
        assert_eq!(tbb.iso9000_uri, None);
    }

    #[rstest]
    #[case(0, Some(MeasurementRootType::Static))]
    #[case(5, Some(MeasurementRootType::Virtual))]
    #[case(6, None)]
    fn rtm_type_range(#[case] value: u8, #[case] expected: Option<MeasurementRootType>) {
        let result = decode(&seq(&[implicit(2, &[value])]));
        match expected {
            Some(rtm) => assert_eq!(result.unwrap().rtm_type, Some(rtm)),
            None => assert!(matches!(result, Err(DecodeError::InvalidEnumValue(..)))),
        }
    }

    #[test]
    fn capability_bits() {
        let der = seq(&[constructed(5, &tlv(0x03, &[0x00, 0x80])), implicit(6, &[0x00, 0x40])]);
        let tbb = decode(&der).unwrap();
        assert_eq!(tbb.firmware_capabilities.as_deref(), Some("80"));
        assert_eq!(tbb.hardware_capabilities.as_deref(), Some("40"));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = decode(&seq(&[implicit(9, &[0])])).unwrap_err();
        assert_eq!(err.to_string(), "TBB Security Assertion contains invalid tagged object.");
    }
}
