// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Distinguished name rendering and canonicalisation.

use der::Decode;
use x509::name::Name;

use crate::asn1::Element;
use crate::error::DecodeError;

/// Placeholder used as the sorted form of an empty name.
pub const BLANK: &str = "BLANK";

const DIRECTORY_NAME: u8 = 4;

/// Renders an encoded `Name` in its string form.
pub fn dn_from_der(der: &[u8]) -> Result<String, DecodeError> {
    Ok(Name::from_der(der)?.to_string())
}

/// The string form of the first directory name in a `GeneralNames`.
///
/// Other name forms are only used when no directory name is present.
pub fn general_names(names: &[Element<'_>]) -> Result<Option<String>, DecodeError> {
    for name in names {
        if let Some(t) = name.as_tagged() {
            if t.number == DIRECTORY_NAME && t.constructed {
                return dn_from_der(t.contents).map(Some);
            }
        }
    }

    for name in names {
        if let Some(t) = name.as_tagged() {
            if !t.constructed {
                if let Ok(s) = t.implicit_ia5() {
                    return Ok(Some(s.to_string()));
                }
            }
        }
    }

    Ok(None)
}

/// Canonical form of a distinguished name used for organisation lookups.
///
/// Attributes are trimmed, lowercased and sorted so that names which only
/// differ in RDN order compare equal.
pub fn sort_dn(dn: Option<&str>) -> String {
    let dn = match dn {
        Some(dn) if !dn.trim().is_empty() => dn,
        _ => return BLANK.into(),
    };

    let mut parts: Vec<String> = dn.split(',').map(|p| p.trim().to_lowercase()).collect();
    parts.sort();
    parts.join(",")
}

/// The value of the organisation attribute, if the name has one.
pub fn organization(dn: &str) -> Option<String> {
    dn.split(',')
        .filter_map(|part| part.split_once('='))
        .find(|(kind, _)| kind.trim().eq_ignore_ascii_case("o"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(None, "BLANK")]
    #[case(Some(""), "BLANK")]
    #[case(Some("CN=Fake Root CA"), "cn=fake root ca")]
    #[case(Some("O=Example, CN=Root, C=US"), "c=us,cn=root,o=example")]
    #[case(Some("C=US,CN=Root,O=Example"), "c=us,cn=root,o=example")]
    fn sorted_names(#[case] dn: Option<&str>, #[case] expected: &str) {
        assert_eq!(sort_dn(dn), expected);
    }

    #[rstest]
    #[case("O=Example, CN=Root, C=US", Some("Example"))]
    #[case("cn=Leaf,o=Vendor Inc", Some("Vendor Inc"))]
    #[case("CN=Fake Root CA", None)]
    #[case("O=,CN=x", None)]
    fn organization_attribute(#[case] dn: &str, #[case] expected: Option<&str>) {
        assert_eq!(organization(dn).as_deref(), expected);
    }
}
