// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::Serialize;

use crate::asn1::Element;
use crate::error::DecodeError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SecurityLevel {
    Level1,
    Level2,
    Level3,
    Level4,
}

impl SecurityLevel {
    const ALL: [Self; 4] = [Self::Level1, Self::Level2, Self::Level3, Self::Level4];

    /// Levels are numbered from one on the wire.
    pub fn from_value(value: i64) -> Result<Self, DecodeError> {
        super::pick(&Self::ALL, value - 1, "security level")
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = Self::ALL.iter().position(|l| l == self).unwrap_or_default() + 1;
        write!(f, "level {n}")
    }
}

/// FIPS 140 conformance claim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FipsLevel {
    pub version: String,
    pub level: SecurityLevel,
    pub plus: bool,
}

impl FipsLevel {
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let (version, level, rest) = match elements {
            [version, level, rest @ ..] => (version, level, rest),
            _ => return Err(DecodeError::illegal("FIPS level does not have required values.")),
        };

        let plus = match rest.first() {
            Some(Element::Boolean(b)) => *b,
            _ => false,
        };

        Ok(Self {
            version: version.expect_ia5("FIPS version")?.to_string(),
            level: SecurityLevel::from_value(level.expect_enumerated("FIPS level")?)?,
            plus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::{self, tests::*};

    use rstest::rstest;

    fn decode(der: &[u8]) -> Result<FipsLevel, DecodeError> {
        let parsed = asn1::parse(der).unwrap();
        FipsLevel::from_sequence(parsed.as_sequence().unwrap())
    }

    #[rstest]
    #[case(1, Some(SecurityLevel::Level1))]
    #[case(4, Some(SecurityLevel::Level4))]
    #[case(0, None)]
    #[case(5, None)]
    fn level_range(#[case] value: u8, #[case] expected: Option<SecurityLevel>) {
        let fips = decode(&seq(&[ia5("140-2"), enumerated(value)]));
        match expected {
            Some(level) => assert_eq!(fips.unwrap().level, level),
            None => assert!(matches!(fips, Err(DecodeError::InvalidEnumValue(..)))),
        }
    }

    #[test]
    fn plus_flag() {
        let fips = decode(&seq(&[ia5("140-2"), enumerated(2), boolean(true)])).unwrap();
        assert!(fips.plus);
        assert_eq!(fips.level.to_string(), "level 2");
    }
}
