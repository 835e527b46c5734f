// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Decoded credentials.
//!
//! Every credential embeds [`Common`] and adds the fields of its role.
//! [`Credential`] closes over the three roles the validation engine deals
//! with.

mod ca;
mod common;
mod endorsement;
mod platform;

pub use self::ca::CaCredential;
pub use self::common::{signature_algorithm_name, Common};
pub use self::endorsement::EndorsementCredential;
pub use self::platform::{PlatformCredential, CERTIFICATE_TYPE_1_2, CERTIFICATE_TYPE_2_0};

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::asn1;
use crate::classify::{classify_der, CertificateType};
use crate::error::{DecodeError, Error, Result, VerificationFailure};

/// DER of the TPM manufacturer attribute type, only present in endorsement credentials.
const TPM_MANUFACTURER_DER: [u8; 7] = [0x06, 0x05, 0x67, 0x81, 0x05, 0x02, 0x01];

/// Removes PEM armour and any padding after the declared length.
pub(crate) fn prepare(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        return Err(Error::InvalidArgument(
            "Cannot construct a Certificate from an empty byte array",
        ));
    }

    let der = asn1::strip_pem(bytes)?;
    Ok(asn1::trim(&der)?.to_vec())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CredentialKind {
    #[serde(rename = "ca")]
    Ca,
    #[serde(rename = "endorsement")]
    Endorsement,
    #[serde(rename = "platform")]
    Platform,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ca => "CertificateAuthorityCredential",
            Self::Endorsement => "EndorsementCredential",
            Self::Platform => "PlatformCredential",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Credential {
    Ca(CaCredential),
    Endorsement(EndorsementCredential),
    Platform(PlatformCredential),
}

impl From<CaCredential> for Credential {
    fn from(value: CaCredential) -> Self {
        Self::Ca(value)
    }
}

impl From<EndorsementCredential> for Credential {
    fn from(value: EndorsementCredential) -> Self {
        Self::Endorsement(value)
    }
}

impl From<PlatformCredential> for Credential {
    fn from(value: PlatformCredential) -> Self {
        Self::Platform(value)
    }
}

impl Credential {
    /// Decodes a credential, choosing its role from its content.
    ///
    /// Attribute certificates are platform credentials. Certificates
    /// carrying the TPM manufacturer attribute are endorsement credentials.
    /// Anything else is treated as a certificate authority.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw = prepare(bytes)?;
        match classify_der(&raw)? {
            CertificateType::X509AttributeCertificate => Ok(PlatformCredential::from_der(raw)?.into()),
            CertificateType::X509Certificate if contains(&raw, &TPM_MANUFACTURER_DER) => {
                Ok(EndorsementCredential::from_der(raw)?.into())
            }
            CertificateType::X509Certificate => Ok(CaCredential::from_der(raw)?.into()),
            CertificateType::Invalid => Err(DecodeError::illegal("Unrecognized certificate structure").into()),
        }
    }

    /// Decodes a credential in a role chosen by the caller.
    pub fn from_bytes_as(kind: CredentialKind, bytes: &[u8]) -> Result<Self> {
        Ok(match kind {
            CredentialKind::Ca => CaCredential::from_bytes(bytes)?.into(),
            CredentialKind::Endorsement => EndorsementCredential::parse_with_possible_header(bytes)?.into(),
            CredentialKind::Platform => PlatformCredential::parse_with_possible_header(bytes)?.into(),
        })
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Ca(..) => CredentialKind::Ca,
            Self::Endorsement(..) => CredentialKind::Endorsement,
            Self::Platform(..) => CredentialKind::Platform,
        }
    }

    pub fn common(&self) -> &Common {
        match self {
            Self::Ca(c) => &c.common,
            Self::Endorsement(c) => &c.common,
            Self::Platform(c) => &c.common,
        }
    }

    pub fn certificate_type(&self) -> CertificateType {
        self.common().certificate_type
    }

    /// Checks that `issuer` signed this credential.
    pub fn is_issuer(&self, issuer: &Credential) -> Result<(), VerificationFailure> {
        self.common().is_issuer(issuer.common())
    }

    /// Combines the content hash with the role, so the same bytes may be
    /// held once per role.
    pub fn type_hash(&self) -> String {
        type_hash(&self.common().content_hash, self.kind())
    }
}

pub fn type_hash(content_hash: &str, kind: CredentialKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(kind.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
