// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use const_oid::db::rfc5912::{ID_CE_CERTIFICATE_POLICIES, ID_CE_SUBJECT_ALT_NAME};
use const_oid::ObjectIdentifier;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::common::{AttributeCertificate, Common};
use super::prepare;
use crate::asn1::{self, Element};
use crate::attributes::{ComponentIdentifier, PlatformConfiguration, TbbSecurityAssertion, UriReference};
use crate::error::{DecodeError, Result};

pub const CERTIFICATE_TYPE_1_2: &str = "TCPA Trusted Platform Endorsement";
pub const CERTIFICATE_TYPE_2_0: &str = "TCG Trusted Platform Endorsement";

const POLICY_QUALIFIER_CPSURI: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.2.1");
const POLICY_QUALIFIER_USER_NOTICE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.2.2");

const PLATFORM_MANUFACTURER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.4");
const PLATFORM_MODEL: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.5");
const PLATFORM_VERSION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.6");
const PLATFORM_SERIAL: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.23");
const PLATFORM_BASEBOARD_CHASSIS_COMBINED: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.5.1.6");

const PLATFORM_MANUFACTURER_2_0: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.5.1.1");
const PLATFORM_MODEL_2_0: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.5.1.4");
const PLATFORM_VERSION_2_0: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.5.1.5");
const PLATFORM_SERIAL_2_0: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.5.1.6");

const TCG_PLATFORM_SPECIFICATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.17");
const TBB_SECURITY_ASSERTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.19");
const TCG_CREDENTIAL_SPECIFICATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.23");
const PLATFORM_CONFIGURATION_URI: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.5.1.3");
const PLATFORM_CONFIGURATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.5.1.7.1");
const PLATFORM_CONFIGURATION_V2: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.5.1.7.2");
const PLATFORM_CREDENTIAL_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.2.25");
const PLATFORM_BASE_CERT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.8.2");
const PLATFORM_DELTA_CERT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.8.5");

const DIRECTORY_NAME: u8 = 4;

/// Vendors sometimes prepend a fixed-size header to the certificate.
const HEADER_LEN: usize = 8;

const TCG_PLATFORM_MAP: [(&str, &str); 15] = [
    ("#00000000", "Unclassified"),
    ("#00000001", "PC Client"),
    ("#00000002", "PDA"),
    ("#00000003", "CELLPHONE"),
    ("#00000004", "SERVER"),
    ("#00000005", "PERIPHERAL"),
    ("#00000006", "TSS"),
    ("#00000007", "STORAGE"),
    ("#00000008", "AUTHENTICATION"),
    ("#00000009", "EMBEDDED"),
    ("#00000010", "HARD COPY"),
    ("#00000011", "INFRASTRUCTURE"),
    ("#00000012", "VIRTUALIZATION"),
    ("#00000013", "TNC"),
    ("#00000014", "MULTI-TENANT"),
];

/// An attribute certificate describing a platform, either in full (base)
/// or as changes to an earlier credential (delta).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlatformCredential {
    #[serde(flatten)]
    pub common: Common,
    pub credential_type: String,
    pub cps_uri: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
    pub platform_serial: Option<String>,
    pub chassis_serial_number: Option<String>,
    pub major_version: i64,
    pub minor_version: i64,
    pub revision_level: i64,
    pub platform_class: Option<String>,
    pub tcg_credential_major_version: i64,
    pub tcg_credential_minor_version: i64,
    pub tcg_credential_revision_level: i64,
    pub platform_base: bool,
    pub platform_chain_type: Option<String>,
    pub is_delta_chain: bool,
    pub configuration: Option<PlatformConfiguration>,
    pub configuration_uri: Option<UriReference>,
    pub tbb_security_assertion: Option<TbbSecurityAssertion>,
    /// Summary text recorded by the last validation run against this credential.
    pub component_failures: String,
}

struct PolicyQualifiers {
    user_notice: String,
    cps_uri: String,
}

fn policy_qualifiers(ac: &AttributeCertificate<'_, '_>) -> Result<PolicyQualifiers, DecodeError> {
    let mut out = PolicyQualifiers {
        user_notice: String::new(),
        cps_uri: String::new(),
    };

    let value = match ac.extension(ID_CE_CERTIFICATE_POLICIES)? {
        Some(value) => value,
        None => return Ok(out),
    };

    let policies = asn1::parse(value)?;
    for policy in policies.expect_sequence("certificate policies")? {
        let qualifiers = match policy.expect_sequence("policy information")? {
            [_, Element::Sequence(q), ..] => &q.elements,
            _ => continue,
        };

        for qualifier in qualifiers {
            match qualifier.expect_sequence("policy qualifier")? {
                [id, value] if id.as_oid() == Some(POLICY_QUALIFIER_CPSURI) => {
                    out.cps_uri = value.expect_ia5("CPS URI")?.to_string();
                }
                [id, Element::Sequence(notice)] if id.as_oid() == Some(POLICY_QUALIFIER_USER_NOTICE) => {
                    if let Some(text) = notice.elements.last().and_then(Element::as_str) {
                        out.user_notice = text.to_string();
                    }
                }
                _ => (),
            }
        }
    }

    Ok(out)
}

/// Every `(type, value)` in the directory names of the subject alternative name.
fn directory_attributes<'a>(ac: &AttributeCertificate<'_, 'a>) -> Result<Vec<(ObjectIdentifier, String)>, DecodeError> {
    let value = match ac.extension(ID_CE_SUBJECT_ALT_NAME)? {
        Some(value) => value,
        None => return Ok(Vec::new()),
    };

    let names = asn1::parse(value)?;
    let mut out = Vec::new();

    for name in names.expect_sequence("subject alternative name")? {
        let dn = match name.as_tagged() {
            Some(t) if t.number == DIRECTORY_NAME => t.explicit()?,
            _ => continue,
        };

        for rdn in dn.expect_sequence("directory name")? {
            let atvs = match rdn {
                Element::Set(set) => &set.elements,
                _ => continue,
            };

            for atv in atvs {
                if let [kind, value] = atv.expect_sequence("attribute type and value")? {
                    if let (Some(oid), Some(s)) = (kind.as_oid(), value.as_str()) {
                        out.push((oid, s.to_string()));
                    }
                }
            }
        }
    }

    Ok(out)
}

fn version_triple(elements: &[Element<'_>]) -> Option<(i64, i64, i64)> {
    let number = |e: &Element<'_>| match e {
        Element::Integer(i) => i.to_i64().ok(),
        other => other.as_str().and_then(|s| s.trim().parse().ok()),
    };

    match elements {
        [a, b, c, ..] => Some((number(a)?, number(b)?, number(c)?)),
        _ => None,
    }
}

impl PlatformCredential {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_der(prepare(bytes)?)
    }

    /// Decodes the credential, retrying once without a vendor header.
    pub fn parse_with_possible_header(bytes: &[u8]) -> Result<Self> {
        match Self::from_bytes(bytes) {
            Ok(pc) => Ok(pc),
            Err(e) if bytes.len() > HEADER_LEN => {
                debug!("Attempting parse after removing extra header bytes: {e}");
                Self::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
                    warn!("Failed to parse PC after multiple attempts: {e}");
                    e
                })
            }
            Err(e) => {
                warn!("PC parsing failed (only one attempt possible): {e}");
                Err(e)
            }
        }
    }

    pub(crate) fn from_der(raw: Vec<u8>) -> Result<Self> {
        let common = Common::from_attribute_certificate(raw)?;
        let raw = common.raw.clone();

        let mut out = Self {
            common,
            ..Default::default()
        };

        let root = asn1::parse(&raw)?;
        let ac = AttributeCertificate::new(&root)?;

        let qualifiers = policy_qualifiers(&ac)?;
        out.cps_uri = Some(qualifiers.cps_uri).filter(|s| !s.is_empty());
        out.credential_type = qualifiers.user_notice;

        let v2 = match out.credential_type.as_str() {
            CERTIFICATE_TYPE_1_2 => false,
            CERTIFICATE_TYPE_2_0 => true,
            other => {
                return Err(DecodeError::illegal(format!("Invalid Attribute Credential Type: {other}")).into())
            }
        };

        out.parse_names(&ac, v2)?;
        if v2 {
            out.parse_attributes(&ac)?;
        } else if let Err(e) = out.parse_attributes(&ac) {
            error!("Unable to parse Platform Configuration from Platform Credential: {e}");
            out.configuration = None;
        }

        out.parse_platform_fields(&ac)?;
        Ok(out)
    }

    fn parse_names(&mut self, ac: &AttributeCertificate<'_, '_>, v2: bool) -> Result<(), DecodeError> {
        for (oid, value) in directory_attributes(ac)? {
            match (v2, oid) {
                (false, PLATFORM_MANUFACTURER) | (true, PLATFORM_MANUFACTURER_2_0) => {
                    self.manufacturer = Some(value)
                }
                (false, PLATFORM_MODEL) | (true, PLATFORM_MODEL_2_0) => self.model = Some(value),
                (false, PLATFORM_VERSION) | (true, PLATFORM_VERSION_2_0) => self.version = Some(value),
                (false, PLATFORM_SERIAL) | (true, PLATFORM_SERIAL_2_0) => self.platform_serial = Some(value),
                (false, PLATFORM_BASEBOARD_CHASSIS_COMBINED) => match value.split(',').collect::<Vec<_>>()[..] {
                    [chassis, board] => {
                        self.chassis_serial_number = Some(chassis.to_string());
                        self.platform_serial = Some(board.to_string());
                    }
                    _ => warn!("Unable to parse combined baseboard/chassis SN field"),
                },
                _ => (),
            }
        }

        Ok(())
    }

    /// Decodes the TCG attributes that describe the platform's composition.
    fn parse_attributes(&mut self, ac: &AttributeCertificate<'_, '_>) -> Result<(), DecodeError> {
        for (oid, values) in ac.attributes()? {
            let value = match values.first() {
                Some(v) => v,
                None => continue,
            };

            match oid {
                TBB_SECURITY_ASSERTION => {
                    self.tbb_security_assertion = Some(TbbSecurityAssertion::from_sequence(
                        value.expect_sequence("TBB security assertion")?,
                    )?)
                }
                PLATFORM_CONFIGURATION_URI => {
                    self.configuration_uri = Some(UriReference::from_sequence(
                        value.expect_sequence("platform configuration URI")?,
                    )?)
                }
                PLATFORM_CONFIGURATION => {
                    self.configuration = Some(PlatformConfiguration::from_sequence_v1(
                        value.expect_sequence("platform configuration")?,
                    )?)
                }
                PLATFORM_CONFIGURATION_V2 => {
                    self.configuration = Some(PlatformConfiguration::from_sequence_v2(
                        value.expect_sequence("platform configuration")?,
                    )?)
                }
                TCG_CREDENTIAL_SPECIFICATION => {
                    if let Some((major, minor, revision)) = value.as_sequence().and_then(version_triple) {
                        self.tcg_credential_major_version = major;
                        self.tcg_credential_minor_version = minor;
                        self.tcg_credential_revision_level = revision;
                    }
                }
                TCG_PLATFORM_SPECIFICATION | PLATFORM_CREDENTIAL_TYPE => (),
                other => warn!("No class defined for attribute with OID: {other}"),
            }
        }

        Ok(())
    }

    /// The platform specification and the base or delta marker.
    fn parse_platform_fields(&mut self, ac: &AttributeCertificate<'_, '_>) -> Result<(), DecodeError> {
        for (oid, values) in ac.attributes()? {
            let fields = match values.first().and_then(Element::as_sequence) {
                Some(f) => f,
                None => continue,
            };

            match oid {
                TCG_PLATFORM_SPECIFICATION => {
                    if let Some((major, minor, revision)) = fields
                        .first()
                        .and_then(Element::as_sequence)
                        .and_then(version_triple)
                    {
                        self.major_version = major;
                        self.minor_version = minor;
                        self.revision_level = revision;
                    }
                    self.platform_class = match fields.get(1) {
                        Some(Element::OctetString(class)) => Some(format!("#{}", hex::encode(class))),
                        _ => None,
                    };
                }
                PLATFORM_CREDENTIAL_TYPE => match fields.first().and_then(Element::as_oid) {
                    Some(PLATFORM_BASE_CERT) => {
                        self.platform_base = true;
                        self.platform_chain_type = Some("Base".into());
                        self.is_delta_chain = true;
                    }
                    Some(PLATFORM_DELTA_CERT) => {
                        self.platform_base = false;
                        self.platform_chain_type = Some("Delta".into());
                        self.is_delta_chain = true;
                    }
                    _ => (),
                },
                _ => (),
            }
        }

        Ok(())
    }

    /// A credential without a credential type attribute is a standalone base.
    pub fn is_base(&self) -> bool {
        self.platform_base || !self.is_delta_chain
    }

    pub fn is_delta(&self) -> bool {
        self.is_delta_chain && !self.platform_base
    }

    pub fn is_delta_chain(&self) -> bool {
        self.is_delta_chain
    }

    pub fn is_version2(&self) -> bool {
        self.credential_type == CERTIFICATE_TYPE_2_0
    }

    pub fn components(&self) -> &[ComponentIdentifier] {
        self.configuration
            .as_ref()
            .map_or(&[][..], |c| &c.components[..])
    }

    /// The registered name of the platform class, if known.
    pub fn platform_class_name(&self) -> Option<&'static str> {
        let class = self.platform_class.as_deref()?;
        TCG_PLATFORM_MAP
            .iter()
            .find(|(key, _)| *key == class)
            .map(|(_, name)| *name)
    }
}
