// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use crate::asn1::{self, Element};
use crate::error::{DecodeError, Result};

/// Number of fields in an AttributeCertificateInfo carrying extensions.
pub const MIN_ATTR_CERT_LENGTH: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CertificateType {
    X509Certificate,
    X509AttributeCertificate,
    Invalid,
}

/// Classifies already trimmed DER by the shape of its first inner SEQUENCE.
///
/// An INTEGER first element means either an attribute certificate
/// (at least [`MIN_ATTR_CERT_LENGTH`] fields) or a version 1 certificate.
/// An explicit tag in front means a version 2 or 3 certificate.
pub fn classify_der(der: &[u8]) -> Result<CertificateType, DecodeError> {
    let outer = asn1::parse(der)?;
    let info = outer
        .as_sequence()
        .and_then(|e| e.first())
        .and_then(Element::as_sequence);

    let info = match info {
        Some(info) => info,
        None => return Ok(CertificateType::Invalid),
    };

    Ok(match info.first() {
        Some(Element::Integer(..)) if info.len() >= MIN_ATTR_CERT_LENGTH => {
            CertificateType::X509AttributeCertificate
        }
        Some(Element::Integer(..)) => CertificateType::X509Certificate,
        Some(Element::Tagged(..)) => CertificateType::X509Certificate,
        _ => CertificateType::Invalid,
    })
}

/// Strips PEM armour and padding, then classifies.
pub fn classify(bytes: &[u8]) -> Result<CertificateType> {
    let der = asn1::strip_pem(bytes)?;
    let trimmed = asn1::trim(&der)?;
    Ok(classify_der(trimmed)?)
}
