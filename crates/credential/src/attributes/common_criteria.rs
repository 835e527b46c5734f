// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::Serialize;

use super::{pick, UriReference};
use crate::asn1::Element;
use crate::error::DecodeError;

const STRENGTH_OF_FUNCTION: u8 = 0;
const PROFILE_OID: u8 = 1;
const PROFILE_URI: u8 = 2;
const TARGET_OID: u8 = 3;
const TARGET_URI: u8 = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EvaluationStatus {
    DesignedToMeet,
    EvaluationInProgress,
    EvaluationCompleted,
}

impl EvaluationStatus {
    const ALL: [Self; 3] = [
        Self::DesignedToMeet,
        Self::EvaluationInProgress,
        Self::EvaluationCompleted,
    ];
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DesignedToMeet => "designed To Meet",
            Self::EvaluationInProgress => "evaluation In Progress",
            Self::EvaluationCompleted => "evaluation Completed",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum StrengthOfFunction {
    Basic,
    Medium,
    High,
}

impl StrengthOfFunction {
    const ALL: [Self; 3] = [Self::Basic, Self::Medium, Self::High];
}

impl fmt::Display for StrengthOfFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Basic => "basic",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Evaluation assurance level, EAL1 through EAL7.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct EvaluationAssuranceLevel(u8);

impl EvaluationAssuranceLevel {
    pub fn new(level: i64) -> Result<Self, DecodeError> {
        match u8::try_from(level) {
            Ok(l @ 1..=7) => Ok(Self(l)),
            _ => Err(DecodeError::InvalidEnumValue("Invalid assurance level.".into())),
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for EvaluationAssuranceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CommonCriteriaMeasures {
    pub version: String,
    pub assurance_level: EvaluationAssuranceLevel,
    pub evaluation_status: EvaluationStatus,
    pub plus: bool,
    pub strength_of_function: Option<StrengthOfFunction>,
    pub profile_oid: Option<String>,
    pub profile_uri: Option<UriReference>,
    pub target_oid: Option<String>,
    pub target_uri: Option<UriReference>,
}

impl CommonCriteriaMeasures {
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let (version, level, status, mut rest) = match elements {
            [version, level, status, rest @ ..] => (version, level, status, rest),
            _ => {
                return Err(DecodeError::illegal(
                    "Common criteria measures does not have required values.",
                ))
            }
        };

        let mut out = Self {
            version: version.expect_ia5("common criteria version")?.to_string(),
            assurance_level: EvaluationAssuranceLevel::new(level.expect_enumerated("assurance level")?)?,
            evaluation_status: pick(
                &EvaluationStatus::ALL,
                status.expect_enumerated("evaluation status")?,
                "evaluation status",
            )?,
            plus: false,
            strength_of_function: None,
            profile_oid: None,
            profile_uri: None,
            target_oid: None,
            target_uri: None,
        };

        if let Some((Element::Boolean(plus), tail)) = rest.split_first() {
            out.plus = *plus;
            rest = tail;
        }

        for element in rest {
            let tagged = element.as_tagged().ok_or(DecodeError::UnrecognizedTaggedObject(
                "Common criteria measures contains invalid tagged object.",
            ))?;

            match tagged.number {
                STRENGTH_OF_FUNCTION => {
                    out.strength_of_function = Some(pick(
                        &StrengthOfFunction::ALL,
                        tagged.implicit_enumerated()?,
                        "strength of function",
                    )?);
                }
                PROFILE_OID => out.profile_oid = Some(tagged.implicit_oid()?.to_string()),
                PROFILE_URI => {
                    out.profile_uri = Some(UriReference::from_sequence(&tagged.implicit_sequence()?)?)
                }
                TARGET_OID => out.target_oid = Some(tagged.implicit_oid()?.to_string()),
                TARGET_URI => {
                    out.target_uri = Some(UriReference::from_sequence(&tagged.implicit_sequence()?)?)
                }
                _ => {
                    return Err(DecodeError::UnrecognizedTaggedObject(
                        "Common criteria measures contains invalid tagged object.",
                    ))
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::asn1::{self, tests::*};

    use const_oid::ObjectIdentifier;
    use rstest::rstest;

    pub fn measures_der(level: u8) -> Vec<u8> {
        seq(&[ia5("3.1"), enumerated(level), enumerated(2)])
    }

    fn decode(der: &[u8]) -> Result<CommonCriteriaMeasures, DecodeError> {
        let parsed = asn1::parse(der).unwrap();
        CommonCriteriaMeasures::from_sequence(parsed.as_sequence().unwrap())
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(4, true)]
    #[case(7, true)]
    #[case(8, false)]
    fn assurance_level_range(#[case] level: u8, #[case] ok: bool) {
        match decode(&measures_der(level)) {
            Ok(cc) => {
                assert!(ok);
                assert_eq!(cc.assurance_level.to_string(), format!("level {level}"));
            }
            Err(e) => {
                assert!(!ok);
                assert!(matches!(e, DecodeError::InvalidEnumValue(..)));
            }
        }
    }

    #[rstest]
    #[case(0, Some("designed To Meet"))]
    #[case(2, Some("evaluation Completed"))]
    #[case(3, None)]
    fn evaluation_status_range(#[case] status: u8, #[case] expected: Option<&str>) {
        let der = seq(&[ia5("3.1"), enumerated(4), enumerated(status)]);
        match expected {
            Some(name) => assert_eq!(decode(&der).unwrap().evaluation_status.to_string(), name),
            None => assert!(matches!(decode(&der), Err(DecodeError::InvalidEnumValue(..)))),
        }
    }

    #[test]
    fn optional_fields() {
        let der = seq(&[
            ia5("3.1"),
            enumerated(4),
            enumerated(1),
            boolean(true),
            implicit(0, &[2]),
            implicit(1, ObjectIdentifier::new_unwrap("1.2.3.4").as_bytes()),
            constructed(2, &ia5("https://example.com/pp")),
            implicit(3, ObjectIdentifier::new_unwrap("1.2.3.5").as_bytes()),
        ]);
        let cc = decode(&der).unwrap();
        assert!(cc.plus);
        assert_eq!(cc.strength_of_function, Some(StrengthOfFunction::High));
        assert_eq!(cc.profile_oid.as_deref(), Some("1.2.3.4"));
        assert_eq!(cc.profile_uri.unwrap().uri, "https://example.com/pp");
        assert_eq!(cc.target_oid.as_deref(), Some("1.2.3.5"));
        assert!(cc.target_uri.is_none());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let der = seq(&[ia5("3.1"), enumerated(4), enumerated(1), implicit(7, &[0])]);
        assert!(matches!(decode(&der), Err(DecodeError::UnrecognizedTaggedObject(..))));
    }
}
