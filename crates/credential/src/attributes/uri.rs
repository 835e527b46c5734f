// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use crate::asn1::Element;
use crate::error::DecodeError;

/// A URI plus an optional digest of the document it points at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct UriReference {
    pub uri: String,
    pub hash_algorithm: Option<String>,
    pub hash_value: Option<String>,
}

impl UriReference {
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let (first, rest) = match elements.split_first() {
            Some(split) if elements.len() <= 3 => split,
            _ => return Err(DecodeError::illegal("URIReference does not have required values.")),
        };

        let mut out = Self {
            uri: first.expect_ia5("URIReference")?.to_string(),
            ..Default::default()
        };

        for element in rest {
            match element {
                Element::Sequence(algo) => {
                    out.hash_algorithm = algo
                        .elements
                        .first()
                        .and_then(Element::as_oid)
                        .map(|o| o.to_string());
                }
                Element::BitString(bits) => out.hash_value = bits.get(1..).map(hex::encode),
                other => {
                    return Err(DecodeError::illegal(format!(
                        "URIReference contains unexpected {}",
                        other.kind()
                    )))
                }
            }
        }

        Ok(out)
    }
}
