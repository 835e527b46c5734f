// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Generic ASN.1 element walking.
//!
//! The TCG structures carried in credentials are full of optional fields
//! whose presence can only be decided by looking at the type of the next
//! element. [`Element`] gives every decoded TLV a closed variant so that
//! decoders can pattern-match on it instead of guessing.

use std::borrow::Cow;

use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use const_oid::ObjectIdentifier;
use der::asn1::AnyRef;
use der::{Reader, SliceReader, Tag, Tagged as _};
use rsa::BigUint;

use crate::error::DecodeError;

/// Nesting deeper than this is rejected rather than recursed into.
const MAX_DEPTH: usize = 64;

const PEM_MARKERS: [&str; 4] = [
    "-----BEGIN CERTIFICATE-----",
    "-----END CERTIFICATE-----",
    "-----BEGIN ATTRIBUTE CERTIFICATE-----",
    "-----END ATTRIBUTE CERTIFICATE-----",
];

/// A two's complement INTEGER or ENUMERATED body.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Int<'a>(pub &'a [u8]);

impl Int<'_> {
    pub fn to_i64(&self) -> Result<i64, DecodeError> {
        let bytes = self.0;
        if bytes.is_empty() || bytes.len() > 8 {
            return Err(DecodeError::illegal("integer out of range"));
        }

        let fill = if bytes[0] & 0x80 != 0 { 0xff } else { 0x00 };
        let mut buf = [fill; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }

    /// Interprets the magnitude as an unsigned value, dropping any sign octet.
    pub fn to_unsigned(&self) -> BigUint {
        BigUint::from_bytes_be(self.0)
    }
}

/// A constructed SEQUENCE or SET with its exact encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constructed<'a> {
    pub encoded: &'a [u8],
    pub elements: Vec<Element<'a>>,
}

/// A context-specific tagged object whose contents are not yet interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tagged<'a> {
    pub number: u8,
    pub constructed: bool,
    pub contents: &'a [u8],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Element<'a> {
    Boolean(bool),
    Integer(Int<'a>),
    Enumerated(Int<'a>),
    BitString(&'a [u8]),
    OctetString(&'a [u8]),
    Null,
    Oid(ObjectIdentifier),
    Utf8(&'a str),
    Ia5(&'a str),
    Printable(&'a str),
    UtcTime(&'a str),
    GeneralizedTime(&'a str),
    Sequence(Constructed<'a>),
    Set(Constructed<'a>),
    Tagged(Tagged<'a>),
    Other { tag: Tag, value: &'a [u8] },
}

/// Parses exactly one TLV.
pub fn parse(bytes: &[u8]) -> Result<Element<'_>, DecodeError> {
    parse_at(bytes, 0)
}

/// Parses a run of concatenated TLVs (the body of a SEQUENCE).
pub fn parse_all(bytes: &[u8]) -> Result<Vec<Element<'_>>, DecodeError> {
    parse_many(bytes, 0)
}

fn parse_at(bytes: &[u8], depth: usize) -> Result<Element<'_>, DecodeError> {
    let mut elements = parse_many(bytes, depth)?;
    match elements.len() {
        1 => Ok(elements.remove(0)),
        0 => Err(DecodeError::illegal("no ASN.1 element present")),
        _ => Err(DecodeError::illegal("trailing data after ASN.1 element")),
    }
}

fn parse_many(bytes: &[u8], depth: usize) -> Result<Vec<Element<'_>>, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::illegal("ASN.1 nesting too deep"));
    }

    let mut reader = SliceReader::new(bytes)?;
    let mut out = Vec::new();
    while !reader.is_finished() {
        let start = usize::try_from(reader.position())?;
        let any: AnyRef<'_> = reader.decode()?;
        let end = usize::try_from(reader.position())?;
        out.push(Element::from_any(any, &bytes[start..end], depth)?);
    }

    Ok(out)
}

fn text(value: &[u8], ascii: bool) -> Result<&str, DecodeError> {
    let s = std::str::from_utf8(value).map_err(|_| DecodeError::illegal("invalid string"))?;
    if ascii && !s.is_ascii() {
        return Err(DecodeError::illegal("non-ASCII data in ASCII string"));
    }
    Ok(s)
}

fn oid(value: &[u8]) -> Result<ObjectIdentifier, DecodeError> {
    ObjectIdentifier::from_bytes(value).map_err(|e| DecodeError::illegal(format!("bad OID: {e}")))
}

impl<'a> Element<'a> {
    fn from_any(any: AnyRef<'a>, encoded: &'a [u8], depth: usize) -> Result<Self, DecodeError> {
        let value = any.value();
        Ok(match any.tag() {
            Tag::Boolean => match value {
                [b] => Self::Boolean(*b != 0),
                _ => return Err(DecodeError::illegal("invalid BOOLEAN length")),
            },
            Tag::Integer => Self::Integer(Int(value)),
            Tag::Enumerated => Self::Enumerated(Int(value)),
            Tag::BitString => Self::BitString(value),
            Tag::OctetString => Self::OctetString(value),
            Tag::Null => Self::Null,
            Tag::ObjectIdentifier => Self::Oid(oid(value)?),
            Tag::Utf8String => Self::Utf8(text(value, false)?),
            Tag::Ia5String => Self::Ia5(text(value, true)?),
            Tag::PrintableString => Self::Printable(text(value, true)?),
            Tag::UtcTime => Self::UtcTime(text(value, true)?),
            Tag::GeneralizedTime => Self::GeneralizedTime(text(value, true)?),
            Tag::Sequence => Self::Sequence(Constructed {
                encoded,
                elements: parse_many(value, depth + 1)?,
            }),
            Tag::Set => Self::Set(Constructed {
                encoded,
                elements: parse_many(value, depth + 1)?,
            }),
            Tag::ContextSpecific {
                constructed,
                number,
            } => Self::Tagged(Tagged {
                number: number.value(),
                constructed,
                contents: value,
            }),
            tag => Self::Other { tag, value },
        })
    }

    /// A short name for the element kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Boolean(..) => "BOOLEAN",
            Self::Integer(..) => "INTEGER",
            Self::Enumerated(..) => "ENUMERATED",
            Self::BitString(..) => "BIT STRING",
            Self::OctetString(..) => "OCTET STRING",
            Self::Null => "NULL",
            Self::Oid(..) => "OBJECT IDENTIFIER",
            Self::Utf8(..) => "UTF8String",
            Self::Ia5(..) => "IA5String",
            Self::Printable(..) => "PrintableString",
            Self::UtcTime(..) => "UTCTime",
            Self::GeneralizedTime(..) => "GeneralizedTime",
            Self::Sequence(..) => "SEQUENCE",
            Self::Set(..) => "SET",
            Self::Tagged(..) => "tagged object",
            Self::Other { .. } => "unknown",
        }
    }

    pub fn as_sequence(&self) -> Option<&[Element<'a>]> {
        match self {
            Self::Sequence(c) => Some(&c.elements),
            _ => None,
        }
    }

    pub fn as_tagged(&self) -> Option<&Tagged<'a>> {
        match self {
            Self::Tagged(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_oid(&self) -> Option<ObjectIdentifier> {
        match self {
            Self::Oid(o) => Some(*o),
            _ => None,
        }
    }

    /// Any of the character string types.
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Self::Utf8(s) | Self::Ia5(s) | Self::Printable(s) => Some(s),
            _ => None,
        }
    }

    pub fn expect_sequence(&self, what: &str) -> Result<&[Element<'a>], DecodeError> {
        self.as_sequence()
            .ok_or_else(|| DecodeError::illegal(format!("{what}: expected SEQUENCE, found {}", self.kind())))
    }

    pub fn expect_oid(&self, what: &str) -> Result<ObjectIdentifier, DecodeError> {
        self.as_oid().ok_or_else(|| {
            DecodeError::illegal(format!("{what}: expected OBJECT IDENTIFIER, found {}", self.kind()))
        })
    }

    pub fn expect_utf8(&self, what: &str) -> Result<&'a str, DecodeError> {
        match self {
            Self::Utf8(s) => Ok(s),
            _ => Err(DecodeError::illegal(format!("{what}: expected UTF8String, found {}", self.kind()))),
        }
    }

    pub fn expect_ia5(&self, what: &str) -> Result<&'a str, DecodeError> {
        match self {
            Self::Ia5(s) => Ok(s),
            _ => Err(DecodeError::illegal(format!("{what}: expected IA5String, found {}", self.kind()))),
        }
    }

    pub fn expect_int(&self, what: &str) -> Result<i64, DecodeError> {
        match self {
            Self::Integer(i) => i.to_i64(),
            _ => Err(DecodeError::illegal(format!("{what}: expected INTEGER, found {}", self.kind()))),
        }
    }

    pub fn expect_enumerated(&self, what: &str) -> Result<i64, DecodeError> {
        match self {
            Self::Enumerated(i) => i.to_i64(),
            _ => Err(DecodeError::illegal(format!("{what}: expected ENUMERATED, found {}", self.kind()))),
        }
    }

    pub fn expect_octets(&self, what: &str) -> Result<&'a [u8], DecodeError> {
        match self {
            Self::OctetString(o) => Ok(o),
            _ => Err(DecodeError::illegal(format!("{what}: expected OCTET STRING, found {}", self.kind()))),
        }
    }
}

impl<'a> Tagged<'a> {
    /// Interprets the contents as one explicitly tagged element.
    pub fn explicit(&self) -> Result<Element<'a>, DecodeError> {
        parse(self.contents)
    }

    /// Interprets the contents as the body of an implicitly tagged SEQUENCE.
    pub fn implicit_sequence(&self) -> Result<Vec<Element<'a>>, DecodeError> {
        parse_all(self.contents)
    }

    pub fn implicit_utf8(&self) -> Result<&'a str, DecodeError> {
        text(self.contents, false)
    }

    pub fn implicit_ia5(&self) -> Result<&'a str, DecodeError> {
        text(self.contents, true)
    }

    pub fn implicit_oid(&self) -> Result<ObjectIdentifier, DecodeError> {
        oid(self.contents)
    }

    pub fn implicit_bool(&self) -> Result<bool, DecodeError> {
        match self.contents {
            [b] => Ok(*b != 0),
            _ => Err(DecodeError::illegal("invalid BOOLEAN length")),
        }
    }

    pub fn implicit_enumerated(&self) -> Result<i64, DecodeError> {
        Int(self.contents).to_i64()
    }

    /// Best-effort interpretation of a tagged object whose tagging mode
    /// is not known ahead of time.
    ///
    /// Explicit wrapping wins when the contents parse as a single element.
    /// Otherwise constructed contents are an implicit SEQUENCE, a single
    /// octet is an enumeration and printable text is an IA5String.
    pub fn unwrap_lenient(&self) -> Result<Element<'a>, DecodeError> {
        if let Ok(inner) = self.explicit() {
            return Ok(inner);
        }

        if self.constructed {
            return Ok(Element::Sequence(Constructed {
                encoded: self.contents,
                elements: self.implicit_sequence()?,
            }));
        }

        Ok(match self.contents {
            [_] => Element::Enumerated(Int(self.contents)),
            c if c.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => {
                Element::Ia5(text(c, true)?)
            }
            c => Element::OctetString(c),
        })
    }
}

/// Parses an ASN.1 GeneralizedTime, with or without fractional seconds.
pub fn generalized_time(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S%.fZ")
        .map(|t| Utc.from_utc_datetime(&t))
        .map_err(|_| DecodeError::InvalidDate(s.into()))
}

/// Parses an ASN.1 UTCTime using the RFC 5280 century pivot.
pub fn utc_time(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    let yy: u32 = s
        .get(..2)
        .and_then(|y| y.parse().ok())
        .ok_or_else(|| DecodeError::InvalidDate(s.into()))?;
    let century = if yy < 50 { "20" } else { "19" };
    generalized_time(&format!("{century}{s}"))
}

impl Element<'_> {
    pub fn as_time(&self) -> Result<DateTime<Utc>, DecodeError> {
        match self {
            Self::GeneralizedTime(s) => generalized_time(s),
            Self::UtcTime(s) => utc_time(s),
            other => Err(DecodeError::InvalidDate(other.kind().into())),
        }
    }
}

/// Removes PEM armour from certificate text and decodes the base64 body.
///
/// Binary input is returned untouched.
pub fn strip_pem(bytes: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    let text = match std::str::from_utf8(bytes) {
        Ok(t) if t.contains("-----BEGIN") => t,
        _ => return Ok(Cow::Borrowed(bytes)),
    };

    let mut body = text.to_string();
    for marker in PEM_MARKERS {
        body = body.replace(marker, "");
    }
    body.retain(|c| !c.is_ascii_whitespace());

    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map(Cow::Owned)
        .map_err(|e| DecodeError::illegal(format!("invalid PEM body: {e}")))
}

/// Cuts the first long-form SEQUENCE out of the buffer, discarding any
/// bytes before it and any padding after its declared length.
pub fn trim(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    let len = bytes.len();
    let mut start = 0;
    let mut length = 0;

    let mut pos = 0;
    while pos < len {
        if len - pos <= 2 {
            return Err(DecodeError::TruncatedLength);
        }

        let cur = pos;
        pos += 1;
        if bytes[cur] == 0x30 && bytes[cur + 1] == 0x82 {
            if len - pos <= 3 {
                return Err(DecodeError::BareSequenceOnly);
            }

            start = cur;
            length = usize::from(u16::from_be_bytes([bytes[cur + 2], bytes[cur + 3]])) + 4;
            break;
        }
    }

    if start + length > len {
        return Err(DecodeError::LengthExceedsBuffer);
    }

    Ok(&bytes[start..start + length])
}
