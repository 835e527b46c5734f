// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use super::{ComponentIdentifier, PlatformProperty, UriReference};
use crate::asn1::{Element, Tagged};
use crate::error::DecodeError;

/// The components and properties a platform credential attests to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PlatformConfiguration {
    pub components: Vec<ComponentIdentifier>,
    pub components_uri: Option<UriReference>,
    pub properties: Vec<PlatformProperty>,
    pub properties_uri: Option<UriReference>,
}

fn each_sequence<T>(
    tagged: &Tagged<'_>,
    what: &str,
    f: impl Fn(&[Element<'_>]) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    tagged
        .implicit_sequence()?
        .iter()
        .map(|e| f(e.expect_sequence(what)?))
        .collect()
}

fn uri(tagged: &Tagged<'_>) -> Result<UriReference, DecodeError> {
    UriReference::from_sequence(&tagged.implicit_sequence()?)
}

fn tagged<'a, 'b>(element: &'b Element<'a>) -> Result<&'b Tagged<'a>, DecodeError> {
    element.as_tagged().ok_or_else(|| {
        DecodeError::illegal(format!(
            "platform configuration: expected tagged object, found {}",
            element.kind()
        ))
    })
}

impl PlatformConfiguration {
    /// Version 1.2: `[0]` components, `[1]` properties, `[2]` properties URI.
    ///
    /// Other tags are skipped.
    pub fn from_sequence_v1(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let mut out = Self::default();

        for element in elements {
            let t = tagged(element)?;
            match t.number {
                0 => out.components = each_sequence(t, "component", ComponentIdentifier::from_sequence_v1)?,
                1 => out.properties = each_sequence(t, "property", PlatformProperty::from_sequence)?,
                2 => out.properties_uri = Some(uri(t)?),
                _ => (),
            }
        }

        Ok(out)
    }

    /// Version 2.0 adds a components URI at `[1]` and shifts the property fields.
    pub fn from_sequence_v2(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let mut out = Self::default();

        for element in elements {
            let t = tagged(element)?;
            match t.number {
                0 => out.components = each_sequence(t, "component", ComponentIdentifier::from_sequence_v2)?,
                1 => out.components_uri = Some(uri(t)?),
                2 => out.properties = each_sequence(t, "property", PlatformProperty::from_sequence)?,
                3 => out.properties_uri = Some(uri(t)?),
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

    fn body(parts: &[Vec<u8>]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn v1_layout() {
        let der = seq(&[
            constructed(0, &body(&[seq(&[utf8("Intel"), utf8("Core i7")]), seq(&[utf8("Intel"), utf8("NIC")])])),
            constructed(1, &seq(&[utf8("vPro"), utf8("true")])),
            constructed(2, &ia5("https://example.com/properties")),
            constructed(9, &[]),
        ]);
        let parsed = asn1::parse(&der).unwrap();
        let config = PlatformConfiguration::from_sequence_v1(parsed.as_sequence().unwrap()).unwrap();

        assert_eq!(config.components.len(), 2);
        assert_eq!(config.components[1].model, "NIC");
        assert_eq!(config.properties[0].name, "vPro");
        assert_eq!(
            config.properties_uri.unwrap().uri,
            "https://example.com/properties"
        );
        assert_eq!(config.components_uri, None);
    }

    #[test]
    fn v2_layout() {
        let component = seq(&[seq(&[oid("2.23.133.18.3.1"), octets(&[0, 1, 0, 2])]), utf8("AMD"), utf8("EPYC")]);
        let der = seq(&[
            constructed(0, &component),
            constructed(1, &ia5("https://example.com/components")),
            constructed(2, &seq(&[utf8("AMT"), utf8("false"), implicit(0, &[0])])),
        ]);
        let parsed = asn1::parse(&der).unwrap();
        let config = PlatformConfiguration::from_sequence_v2(parsed.as_sequence().unwrap()).unwrap();

        assert!(config.components[0].is_version2());
        assert_eq!(config.components_uri.unwrap().uri, "https://example.com/components");
        assert_eq!(config.properties[0].name, "AMT");
        assert_eq!(config.properties_uri, None);
    }

    #[test]
    fn equality_is_structural() {
        let der = seq(&[constructed(0, &seq(&[utf8("Intel"), utf8("Core i7")]))]);
        let a = asn1::parse(&der).unwrap();
        let copy = der.clone();
        let b = asn1::parse(&copy).unwrap();
        assert_eq!(
            PlatformConfiguration::from_sequence_v1(a.as_sequence().unwrap()).unwrap(),
            PlatformConfiguration::from_sequence_v1(b.as_sequence().unwrap()).unwrap()
        );
    }

    #[test]
    fn untagged_entry_is_rejected() {
        let der = seq(&[utf8("stray")]);
        let parsed = asn1::parse(&der).unwrap();
        assert!(PlatformConfiguration::from_sequence_v1(parsed.as_sequence().unwrap()).is_err());
    }

    #[test]
    fn failures_propagate() {
        let der = seq(&[constructed(0, &seq(&[utf8("Intel")]))]);
        let parsed = asn1::parse(&der).unwrap();
        assert!(PlatformConfiguration::from_sequence_v1(parsed.as_sequence().unwrap()).is_err());
    }
}
