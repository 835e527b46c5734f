// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use super::AttributeStatus;
use crate::asn1::Element;
use crate::error::DecodeError;

/// A name/value pair describing the platform, with a change status in
/// version 2 credentials.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PlatformProperty {
    pub name: String,
    pub value: String,
    pub status: Option<AttributeStatus>,
}

impl PlatformProperty {
    pub fn from_sequence(elements: &[Element<'_>]) -> Result<Self, DecodeError> {
        let (name, value, rest) = match elements {
            [name, value, rest @ ..] => (name, value, rest),
            _ => return Err(DecodeError::illegal("Platform property does not have required values.")),
        };

        let mut status = None;
        for element in rest {
            match element.as_tagged() {
                Some(t) if t.number == 0 => {
                    status = Some(AttributeStatus::from_value(t.implicit_enumerated()?)?);
                }
                _ => {
                    return Err(DecodeError::UnrecognizedTaggedObject(
                        "Platform property contains invalid tagged object.",
                    ))
                }
            }
        }

        Ok(Self {
            name: name.expect_utf8("property name")?.to_string(),
            value: value.expect_utf8("property value")?.to_string(),
            status,
        })
    }
}
