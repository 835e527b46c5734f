// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use const_oid::db::rfc5912::{ID_CE_BASIC_CONSTRAINTS, ID_CE_SUBJECT_KEY_IDENTIFIER};
use der::Decode;
use serde::Serialize;
use x509::ext::pkix::BasicConstraints;

use super::common::{self, Common};
use super::prepare;
use crate::crypto::TbsCertificateExt;
use crate::error::Result;

/// A certificate authority used to link credentials to a trusted root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CaCredential {
    #[serde(flatten)]
    pub common: Common,
    pub subject_key_identifier: Option<String>,
    /// Whether the basic constraints extension marks this as a CA.
    pub is_ca: bool,
}

impl CaCredential {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_der(prepare(bytes)?)
    }

    pub(crate) fn from_der(raw: Vec<u8>) -> Result<Self> {
        let common = Common::from_x509(raw)?;

        let cert = x509::Certificate::from_der(&common.raw)?;
        let tbs = &cert.tbs_certificate;
        let subject_key_identifier = tbs
            .extension_value(ID_CE_SUBJECT_KEY_IDENTIFIER)
            .map(common::subject_key_identifier)
            .transpose()?;
        let is_ca = tbs
            .extension::<BasicConstraints>(ID_CE_BASIC_CONSTRAINTS)?
            .map_or(false, |bc| bc.ca);

        Ok(Self {
            subject_key_identifier,
            is_ca,
            common,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::KeyPair;

    #[test]
    fn links_by_key_identifier() {
        let root = KeyPair::root("O=Example,CN=Example Root").unwrap();
        let intermediate = root.issue("O=Example,CN=Example Intermediate", true).unwrap();

        let root = CaCredential::from_bytes(&root.cert).unwrap();
        let intermediate = CaCredential::from_bytes(&intermediate.cert).unwrap();

        assert!(root.is_ca);
        assert!(intermediate.is_ca);
        assert!(root.subject_key_identifier.is_some());
        assert_eq!(
            intermediate.common.authority_key_identifier,
            root.subject_key_identifier
        );
        assert_eq!(intermediate.common.issuer_sorted, root.common.subject_sorted.clone().unwrap());
    }

    #[test]
    fn reads_standard_fields() {
        let root = KeyPair::root("CN=Fake Root CA").unwrap();
        let leaf = root.issue("CN=Leaf", false).unwrap();
        let leaf = CaCredential::from_bytes(&leaf.cert).unwrap();

        assert!(!leaf.is_ca);
        assert_eq!(leaf.common.version, 3);
        assert_eq!(leaf.common.key_usage.as_deref(), Some("DIGITAL SIGNATURE\n"));
        assert_eq!(leaf.common.signature_algorithm.as_deref(), Some("SHA256WithECDSA"));
        assert_eq!(leaf.common.public_key_size, 0);
        assert!(leaf.common.not_before <= leaf.common.not_after);
        assert!(leaf.common.is_valid_on(chrono::Utc::now()));
        assert!(!leaf.common.is_self_signed());
    }
}
