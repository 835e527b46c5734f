// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use const_oid::ObjectIdentifier;
use serde::Serialize;
use tracing::{debug, warn};

use super::common::Common;
use super::prepare;
use crate::asn1::{self, Element};
use crate::attributes::{TpmSecurityAssertions, TpmSpecification};
use crate::error::Result;

const TPM_MANUFACTURER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.1");
const TPM_MODEL: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.2");
const TPM_VERSION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.3");
const TPM_SPECIFICATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.16");
const TPM_SECURITY_ASSERTIONS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.18");
const USER_NOTICE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.2.2");

/// Vendors sometimes prepend a fixed-size header to the certificate.
const HEADER_LEN: usize = 7;

pub const CREDENTIAL_TYPE: &str = "TCPA Trusted Platform Module Endorsement";

/// A TPM vendor's certificate for the endorsement key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EndorsementCredential {
    #[serde(flatten)]
    pub common: Common,
    pub credential_type: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
    pub policy_reference: Option<String>,
    pub tpm_specification: Option<TpmSpecification>,
    pub tpm_security_assertions: Option<TpmSecurityAssertions>,
}

impl Default for EndorsementCredential {
    fn default() -> Self {
        Self {
            common: Common::default(),
            credential_type: CREDENTIAL_TYPE.into(),
            manufacturer: None,
            model: None,
            version: None,
            policy_reference: None,
            tpm_specification: None,
            tpm_security_assertions: None,
        }
    }
}

/// The first sequence at or below `element`, looking through SETs.
fn first_sequence<'r, 'a>(element: &'r Element<'a>) -> Option<&'r [Element<'a>]> {
    match element {
        Element::Sequence(c) => Some(&c.elements),
        Element::Set(c) => c.elements.iter().find_map(first_sequence),
        _ => None,
    }
}

fn first_string<'a>(element: &Element<'a>) -> Option<&'a str> {
    match element {
        Element::Set(c) | Element::Sequence(c) => c.elements.iter().find_map(first_string),
        other => other.as_str(),
    }
}

impl EndorsementCredential {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_der(prepare(bytes)?)
    }

    /// Decodes the credential, retrying once without a vendor header.
    pub fn parse_with_possible_header(bytes: &[u8]) -> Result<Self> {
        match Self::from_bytes(bytes) {
            Ok(ec) => Ok(ec),
            Err(e) if bytes.len() > HEADER_LEN => {
                debug!("Attempting parse after removing extra header bytes: {e}");
                Self::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
                    warn!("Failed to parse EK after multiple attempts: {e}");
                    e
                })
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn from_der(raw: Vec<u8>) -> Result<Self> {
        let mut out = Self {
            common: Common::from_x509(raw)?,
            ..Default::default()
        };

        let raw = out.common.raw.clone();
        let root = asn1::parse(&raw)?;
        out.walk(&root, 0);
        Ok(out)
    }

    /// Searches the whole certificate for `SEQUENCE { OID, value }` pairs.
    ///
    /// Vendors place the TPM fields in the subject alternative name, the
    /// subject directory attributes or both, so no single location is
    /// trusted.
    fn walk(&mut self, element: &Element<'_>, depth: usize) {
        if depth > 64 {
            return;
        }

        match element {
            Element::Sequence(c) => {
                if let [Element::Oid(oid), value] = &c.elements[..] {
                    self.record(*oid, value);
                }
                for e in &c.elements {
                    self.walk(e, depth + 1);
                }
            }
            Element::Set(c) => {
                for e in &c.elements {
                    self.walk(e, depth + 1);
                }
            }
            Element::Tagged(t) => {
                if let Ok(inner) = t.unwrap_lenient() {
                    self.walk(&inner, depth + 1);
                }
            }
            Element::OctetString(bytes) => {
                if let Ok(inner) = asn1::parse(bytes) {
                    self.walk(&inner, depth + 1);
                }
            }
            _ => (),
        }
    }

    fn record(&mut self, oid: ObjectIdentifier, value: &Element<'_>) {
        match oid {
            TPM_MANUFACTURER => self.manufacturer = first_string(value).map(Into::into),
            TPM_MODEL => self.model = first_string(value).map(Into::into),
            TPM_VERSION => self.version = first_string(value).map(Into::into),
            USER_NOTICE => {
                if let Some(text) = first_string(value) {
                    self.policy_reference = Some(text.into());
                }
            }
            TPM_SPECIFICATION => match first_sequence(value).map(TpmSpecification::from_sequence) {
                Some(Ok(spec)) => {
                    debug!("Found TPM Spec: {spec}");
                    self.tpm_specification = Some(spec);
                }
                Some(Err(e)) => warn!("unable to decode TPM specification: {e}"),
                None => (),
            },
            TPM_SECURITY_ASSERTIONS => {
                match first_sequence(value).map(TpmSecurityAssertions::from_sequence) {
                    Some(Ok(assertions)) => self.tpm_security_assertions = Some(assertions),
                    Some(Err(e)) => warn!("unable to decode TPM security assertions: {e}"),
                    None => (),
                }
            }
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::KeyPair;

    #[test]
    fn reads_tpm_attributes() {
        let root = KeyPair::root("CN=TPM Vendor CA").unwrap();
        let ek = root.endorsement("id:54434700", "SLB9670", "id:0007").unwrap();
        let ec = EndorsementCredential::from_bytes(&ek.cert).unwrap();

        assert_eq!(ec.credential_type, CREDENTIAL_TYPE);
        assert_eq!(ec.manufacturer.as_deref(), Some("id:54434700"));
        assert_eq!(ec.model.as_deref(), Some("SLB9670"));
        assert_eq!(ec.version.as_deref(), Some("id:0007"));

        let spec = ec.tpm_specification.unwrap();
        assert_eq!(spec.family, "2.0");
        assert_eq!(spec.level, 0);
        assert_eq!(spec.revision, 116);
        assert!(ec.tpm_security_assertions.is_none());
    }

    #[test]
    fn skips_vendor_header() {
        let root = KeyPair::root("CN=TPM Vendor CA").unwrap();
        let ek = root.endorsement("id:54434700", "SLB9670", "id:0007").unwrap();

        // The header contains a long-form SEQUENCE so trimming alone cannot skip it.
        let mut bytes = vec![0x30, 0x82, 0xff, 0xff, 0x00, 0x00, 0x00];
        bytes.extend(&ek.cert);

        assert!(EndorsementCredential::from_bytes(&bytes).is_err());
        let ec = EndorsementCredential::parse_with_possible_header(&bytes).unwrap();
        assert_eq!(ec.common.raw, ek.cert);
    }
}
