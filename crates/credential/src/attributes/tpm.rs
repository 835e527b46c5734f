// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::Serialize;
use tracing::warn;

use super::{pick, CommonCriteriaMeasures, FipsLevel};
use crate::asn1::Element;
use crate::error::DecodeError;

const EK_GENERATION_TYPE: u8 = 0;
const EK_GENERATION_LOCATION: u8 = 1;
const EK_CERT_GENERATION_LOCATION: u8 = 2;
const CC_INFO: u8 = 3;
const FIPS_LEVEL: u8 = 4;
const ISO9000_CERTIFIED: u8 = 5;

/// The TPM specification the endorsed TPM implements.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TpmSpecification {
    pub family: String,
    pub level: i64,
    pub revision: i64,
}

impl TpmSpecification {
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        match elements {
            [family, level, revision] => Ok(Self {
                family: family.expect_utf8("TPM family")?.to_string(),
                level: level.expect_int("TPM level")?,
                revision: revision.expect_int("TPM revision")?,
            }),
            _ => Err(DecodeError::illegal("TPM specification does not have required values.")),
        }
    }
}

impl fmt::Display for TpmSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} level {} revision {}", self.family, self.level, self.revision)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EkGenerationType {
    Internal,
    Injected,
    InternalRevocable,
    InjectedRevocable,
}

impl EkGenerationType {
    const ALL: [Self; 4] = [
        Self::Internal,
        Self::Injected,
        Self::InternalRevocable,
        Self::InjectedRevocable,
    ];
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EkGenerationLocation {
    TpmManufacturer,
    PlatformManufacturer,
    EkCertSigner,
}

impl EkGenerationLocation {
    const ALL: [Self; 3] = [
        Self::TpmManufacturer,
        Self::PlatformManufacturer,
        Self::EkCertSigner,
    ];
}

/// The certificate generation location shares the key location's values.
pub type EkCertGenerationLocation = EkGenerationLocation;

/// How the endorsement key and its certificate came to be.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TpmSecurityAssertions {
    pub version: i64,
    pub field_upgradable: bool,
    pub ek_generation_type: Option<EkGenerationType>,
    pub ek_generation_location: Option<EkGenerationLocation>,
    pub ek_cert_generation_location: Option<EkCertGenerationLocation>,
    pub cc_info: Option<CommonCriteriaMeasures>,
    pub fips_level: Option<FipsLevel>,
    pub iso9000_certified: bool,
    pub iso9000_uri: Option<String>,
}

impl Default for TpmSecurityAssertions {
    fn default() -> Self {
        Self {
            version: 1,
            field_upgradable: false,
            ek_generation_type: None,
            ek_generation_location: None,
            ek_cert_generation_location: None,
            cc_info: None,
            fips_level: None,
            iso9000_certified: false,
            iso9000_uri: None,
        }
    }
}

/// Enumerations outside their range are dropped rather than rejected;
/// vendors have been seen to emit them.
fn lenient<T: Copy>(values: &[T], element: &Element<'_>, what: &str) -> Result<Option<T>, DecodeError> {
    let value = element.expect_enumerated(what)?;
    Ok(pick(values, value, what).ok())
}

impl TpmSecurityAssertions {
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        let mut rest = elements;

        if let [Element::Integer(v), tail @ ..] = rest {
            out.version = v.to_i64()?;
            rest = tail;
        }

        if let [Element::Boolean(b), tail @ ..] = rest {
            out.field_upgradable = *b;
            rest = tail;
        }

        for element in rest {
            let tagged = match element {
                Element::Tagged(t) => t,
                Element::Ia5(uri) => {
                    out.iso9000_uri = Some(uri.to_string());
                    continue;
                }
                _ => continue,
            };

            match tagged.number {
                EK_GENERATION_TYPE => {
                    out.ek_generation_type =
                        lenient(&EkGenerationType::ALL, &tagged.unwrap_lenient()?, "EK generation type")?
                }
                EK_GENERATION_LOCATION => {
                    out.ek_generation_location = lenient(
                        &EkGenerationLocation::ALL,
                        &tagged.unwrap_lenient()?,
                        "EK generation location",
                    )?
                }
                EK_CERT_GENERATION_LOCATION => {
                    out.ek_cert_generation_location = lenient(
                        &EkGenerationLocation::ALL,
                        &tagged.unwrap_lenient()?,
                        "EK certificate generation location",
                    )?
                }
                CC_INFO => {
                    let inner = tagged.unwrap_lenient()?;
                    out.cc_info = Some(CommonCriteriaMeasures::from_sequence(
                        inner.expect_sequence("common criteria measures")?,
                    )?);
                }
                FIPS_LEVEL => {
                    let inner = tagged.unwrap_lenient()?;
                    out.fips_level = Some(FipsLevel::from_sequence(inner.expect_sequence("FIPS level")?)?);
                }
                ISO9000_CERTIFIED => out.iso9000_certified = tagged.implicit_bool()?,
                tag => warn!(tag, "unknown TPM security assertions tag in endorsement credential"),
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

    fn decode(der: &[u8]) -> TpmSecurityAssertions {
        let parsed = asn1::parse(der).unwrap();
        TpmSecurityAssertions::from_sequence(parsed.as_sequence().unwrap()).unwrap()
    }

    #[test]
    fn specification() {
        let der = seq(&[utf8("2.0"), int(0), int(138)]);
        let parsed = asn1::parse(&der).unwrap();
        let spec = TpmSpecification::from_sequence(parsed.as_sequence().unwrap()).unwrap();
        assert_eq!(spec.family, "2.0");
        assert_eq!(spec.level, 0);
        assert_eq!(spec.revision, 138);
    }

    #[test]
    fn defaults_when_empty() {
        let assertions = decode(&seq(&[]));
        assert_eq!(assertions.version, 1);
        assert!(!assertions.field_upgradable);
        assert_eq!(assertions, TpmSecurityAssertions::default());
    }

    #[test]
    fn full_assertions() {
        let der = seq(&[
            int(0),
            boolean(true),
            constructed(0, &enumerated(2)),
            constructed(1, &enumerated(1)),
            constructed(2, &enumerated(0)),
            constructed(3, &measures_der(4)),
            constructed(4, &seq(&[ia5("140-2"), enumerated(2), boolean(true)])),
            implicit(5, &[0xff]),
            ia5("https://example.com/iso9000"),
        ]);

        let assertions = decode(&der);
        assert_eq!(assertions.version, 0);
        assert!(assertions.field_upgradable);
        assert_eq!(assertions.ek_generation_type, Some(EkGenerationType::InternalRevocable));
        assert_eq!(
            assertions.ek_generation_location,
            Some(EkGenerationLocation::PlatformManufacturer)
        );
        assert_eq!(
            assertions.ek_cert_generation_location,
            Some(EkGenerationLocation::TpmManufacturer)
        );
        assert_eq!(assertions.cc_info.unwrap().assurance_level.value(), 4);
        assert!(assertions.fips_level.unwrap().plus);
        assert!(assertions.iso9000_certified);
        assert_eq!(assertions.iso9000_uri.as_deref(), Some("https://example.com/iso9000"));
    }

    #[rstest]
    #[case(3, Some(EkGenerationType::InjectedRevocable))]
    #[case(4, None)]
    fn generation_type_range(#[case] value: u8, #[case] expected: Option<EkGenerationType>) {
        let assertions = decode(&seq(&[constructed(0, &enumerated(value))]));
        assert_eq!(assertions.ek_generation_type, expected);
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let assertions = decode(&seq(&[int(2), implicit(9, &[1])]));
        assert_eq!(assertions.version, 2);
    }
}
