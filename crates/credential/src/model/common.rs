// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};
use const_oid::db::rfc5912::{
    ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_CRL_DISTRIBUTION_POINTS, ID_CE_EXT_KEY_USAGE,
    ID_CE_KEY_USAGE, ID_CE_POLICY_CONSTRAINTS, ID_PE_AUTHORITY_INFO_ACCESS, RSA_ENCRYPTION,
};
use const_oid::ObjectIdentifier;
use der::{Decode, Encode};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{BigUint, PublicKeyParts};
use serde::Serialize;
use sha2::{Digest, Sha256};
use spki::{AlgorithmIdentifier, SubjectPublicKeyInfo};
use tracing::debug;
use x509::ext::pkix::{KeyUsage, KeyUsages};
use x509::time::Time;

use crate::asn1::{self, Element};
use crate::classify::CertificateType;
use crate::crypto::{SubjectPublicKeyInfoExt, TbsCertificateExt};
use crate::error::{DecodeError, Result, VerificationFailure};
use crate::name;

const URI: u8 = 6;

const KEY_USAGE_NAMES: [(KeyUsages, &str); 9] = [
    (KeyUsages::DigitalSignature, "DIGITAL SIGNATURE"),
    (KeyUsages::NonRepudiation, "NON-REPUDIATION"),
    (KeyUsages::KeyEncipherment, "KEY ENCIPHERMENT"),
    (KeyUsages::DataEncipherment, "DATA ENCIPHERMENT"),
    (KeyUsages::KeyAgreement, "KEY AGREEMENT"),
    (KeyUsages::KeyCertSign, "KEY CERT SIGN"),
    (KeyUsages::CRLSign, "CRL SIGN"),
    (KeyUsages::EncipherOnly, "ENCIPHER ONLY"),
    (KeyUsages::DecipherOnly, "DECIPHER ONLY"),
];

/// Attribute certificates only ever name one of these algorithms.
const SIGNATURE_ALGORITHMS: [(&str, &str); 8] = [
    ("1.2.840.113549.1.1.11", "SHA256WithRSA"),
    ("1.2.840.113549.1.1.12", "SHA384WithRSA"),
    ("1.2.840.113549.1.1.13", "SHA512WithRSA"),
    ("1.2.840.113549.1.1.14", "SHA224WithRSA"),
    ("1.2.840.113549.1.1.15", "SHA512-224WithRSA"),
    ("1.2.840.113549.1.1.16", "SHA512-256WithRSA"),
    ("1.2.840.10045.4.3.2", "SHA256WithECDSA"),
    ("1.2.840.10045.4.1", "SHA224WithECDSA"),
];

/// Display name of a signature algorithm, if it is one we recognise.
pub fn signature_algorithm_name(oid: &ObjectIdentifier) -> Option<&'static str> {
    let oid = oid.to_string();
    SIGNATURE_ALGORITHMS
        .iter()
        .find(|(o, _)| *o == oid)
        .map(|(_, name)| *name)
}

fn decimal<S: serde::Serializer>(value: &BigUint, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(value)
}

fn hexed<S: serde::Serializer>(value: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(value))
}

/// Fields shared by every credential, whatever its role or encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Common {
    /// The exact encoding, without PEM armour or trailing padding.
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub certificate_type: CertificateType,
    pub version: i64,
    #[serde(serialize_with = "decimal")]
    pub serial_number: BigUint,
    pub issuer: String,
    pub issuer_sorted: String,
    pub subject: Option<String>,
    pub subject_sorted: Option<String>,
    pub signature_algorithm: Option<String>,
    pub signature_algorithm_oid: String,
    #[serde(serialize_with = "hexed")]
    pub signature: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_key_algorithm: Option<String>,
    pub encoded_public_key: Option<String>,
    pub public_key_modulus_hex: Option<String>,
    pub public_key_size: usize,
    pub key_usage: Option<String>,
    pub extended_key_usage: Vec<String>,
    pub crl_points: Vec<String>,
    pub authority_info_access: Vec<String>,
    pub authority_key_identifier: Option<String>,
    #[serde(serialize_with = "decimal")]
    pub authority_serial_number: BigUint,
    pub policy_constraints: Option<String>,
    #[serde(serialize_with = "decimal")]
    pub holder_serial_number: BigUint,
    pub holder_issuer: Option<String>,
    /// SHA-256 of [`Common::raw`], hex encoded.
    pub content_hash: String,

    /// The signed portion of the encoding.
    #[serde(skip)]
    pub(crate) signed: Vec<u8>,
    #[serde(skip)]
    pub(crate) signature_algorithm_der: Vec<u8>,
    #[serde(skip)]
    pub(crate) public_key_info: Option<Vec<u8>>,
}

impl Default for Common {
    fn default() -> Self {
        Self {
            raw: Vec::new(),
            certificate_type: CertificateType::Invalid,
            version: 0,
            serial_number: BigUint::from(0u32),
            issuer: String::new(),
            issuer_sorted: name::BLANK.into(),
            subject: None,
            subject_sorted: None,
            signature_algorithm: None,
            signature_algorithm_oid: String::new(),
            signature: Vec::new(),
            not_before: DateTime::default(),
            not_after: DateTime::default(),
            public_key_algorithm: None,
            encoded_public_key: None,
            public_key_modulus_hex: None,
            public_key_size: 0,
            key_usage: None,
            extended_key_usage: Vec::new(),
            crl_points: Vec::new(),
            authority_info_access: Vec::new(),
            authority_key_identifier: None,
            authority_serial_number: BigUint::from(0u32),
            policy_constraints: None,
            holder_serial_number: BigUint::from(0u32),
            holder_issuer: None,
            content_hash: String::new(),
            signed: Vec::new(),
            signature_algorithm_der: Vec::new(),
            public_key_info: None,
        }
    }
}

fn to_datetime(time: Time) -> Result<DateTime<Utc>, DecodeError> {
    let d = time.to_unix_duration();
    i64::try_from(d.as_secs())
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, d.subsec_nanos()).single())
        .ok_or_else(|| DecodeError::InvalidDate(format!("{d:?}")))
}

/// The URIs among a run of `GeneralName`s.
fn uris(names: &[Element<'_>]) -> Vec<String> {
    names
        .iter()
        .filter_map(Element::as_tagged)
        .filter(|t| t.number == URI && !t.constructed)
        .filter_map(|t| t.implicit_ia5().ok())
        .map(str::to_string)
        .collect()
}

/// Renders the key usage bits in their fixed order, one per line.
pub(crate) fn key_usage(ku: &KeyUsage) -> String {
    KEY_USAGE_NAMES
        .iter()
        .filter(|(flag, _)| ku.0.contains(*flag))
        .map(|(_, name)| format!("{name}\n"))
        .collect()
}

fn extended_key_usage(value: &[u8]) -> Result<Vec<String>, DecodeError> {
    let parsed = asn1::parse(value)?;
    Ok(parsed
        .expect_sequence("extended key usage")?
        .iter()
        .filter_map(Element::as_oid)
        .map(|o| o.to_string())
        .collect())
}

/// URIs of every full-name distribution point.
fn crl_points(value: &[u8]) -> Result<Vec<String>, DecodeError> {
    let parsed = asn1::parse(value)?;
    let mut out = Vec::new();

    for point in parsed.expect_sequence("CRL distribution points")? {
        let name = match point.as_sequence().and_then(|p| p.first()).and_then(Element::as_tagged) {
            Some(t) if t.number == 0 => t,
            _ => continue,
        };

        // DistributionPointName is a CHOICE, so the outer tag is explicit.
        for choice in asn1::parse_all(name.contents)? {
            if let Some(full) = choice.as_tagged().filter(|t| t.number == 0) {
                out.extend(uris(&full.implicit_sequence()?));
            }
        }
    }

    Ok(out)
}

fn authority_info_access(value: &[u8]) -> Result<Vec<String>, DecodeError> {
    let parsed = asn1::parse(value)?;
    let mut out = Vec::new();

    for access in parsed.expect_sequence("authority info access")? {
        if let [method, location] = access.expect_sequence("access description")? {
            let method = method.expect_oid("access method")?;
            for uri in uris(std::slice::from_ref(location)) {
                out.push(format!("{method} {uri}"));
            }
        }
    }

    Ok(out)
}

/// Returns the hex key identifier and the authority serial, if present.
fn authority_key_identifier(value: &[u8]) -> Result<(Option<String>, Option<BigUint>), DecodeError> {
    let parsed = asn1::parse(value)?;
    let mut id = None;
    let mut serial = None;

    for field in parsed.expect_sequence("authority key identifier")? {
        match field.as_tagged() {
            Some(t) if t.number == 0 => id = Some(hex::encode(t.contents)),
            Some(t) if t.number == 2 => serial = Some(asn1::Int(t.contents).to_unsigned()),
            _ => (),
        }
    }

    Ok((id, serial))
}

pub(crate) fn subject_key_identifier(value: &[u8]) -> Result<String, DecodeError> {
    let parsed = asn1::parse(value)?;
    Ok(hex::encode(parsed.expect_octets("subject key identifier")?))
}

pub(crate) fn content_hash(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

impl Common {
    /// Decodes a public key certificate.
    pub(crate) fn from_x509(raw: Vec<u8>) -> Result<Self> {
        let cert = x509::Certificate::from_der(&raw)?;
        let tbs = &cert.tbs_certificate;

        let spki = &tbs.subject_public_key_info;
        let (modulus, size) = match spki.algorithm.oid {
            RSA_ENCRYPTION => match rsa::RsaPublicKey::from_pkcs1_der(spki.subject_public_key) {
                Ok(key) => (Some(hex::encode(key.n().to_bytes_be())), key.n().bits()),
                Err(_) => (None, 0),
            },
            _ => (None, 0),
        };

        let mut out = Self {
            certificate_type: CertificateType::X509Certificate,
            version: match tbs.version {
                x509::Version::V1 => 1,
                x509::Version::V2 => 2,
                x509::Version::V3 => 3,
            },
            serial_number: BigUint::from_bytes_be(tbs.serial_number.as_bytes()),
            issuer: tbs.issuer.to_string(),
            subject: Some(tbs.subject.to_string()),
            signature_algorithm_oid: cert.signature_algorithm.oid.to_string(),
            signature_algorithm: signature_algorithm_name(&cert.signature_algorithm.oid).map(Into::into),
            signature: cert.signature.raw_bytes().to_vec(),
            not_before: to_datetime(tbs.validity.not_before)?,
            not_after: to_datetime(tbs.validity.not_after)?,
            public_key_algorithm: Some(spki.algorithm.oid.to_string()),
            encoded_public_key: Some(hex::encode(spki.to_vec()?)),
            public_key_modulus_hex: modulus,
            public_key_size: size,
            policy_constraints: tbs.extension_value(ID_CE_POLICY_CONSTRAINTS).map(hex::encode),
            signed: tbs.to_vec()?,
            signature_algorithm_der: cert.signature_algorithm.to_vec()?,
            public_key_info: Some(spki.to_vec()?),
            ..Default::default()
        };

        out.key_usage = tbs
            .extension::<KeyUsage>(ID_CE_KEY_USAGE)?
            .map(|ku| key_usage(&ku));
        if let Some(v) = tbs.extension_value(ID_CE_EXT_KEY_USAGE) {
            out.extended_key_usage = extended_key_usage(v)?;
        }
        if let Some(v) = tbs.extension_value(ID_CE_CRL_DISTRIBUTION_POINTS) {
            out.crl_points = crl_points(v)?;
        }
        if let Some(v) = tbs.extension_value(ID_PE_AUTHORITY_INFO_ACCESS) {
            out.authority_info_access = authority_info_access(v)?;
        }
        if let Some(v) = tbs.extension_value(ID_CE_AUTHORITY_KEY_IDENTIFIER) {
            let (id, serial) = authority_key_identifier(v)?;
            out.authority_key_identifier = id;
            out.authority_serial_number = serial.unwrap_or_else(|| BigUint::from(0u32));
        }

        out.finish(raw);
        Ok(out)
    }

    /// Decodes the generic parts of an attribute certificate.
    pub(crate) fn from_attribute_certificate(raw: Vec<u8>) -> Result<Self> {
        let mut out = {
            let root = asn1::parse(&raw)?;
            let ac = AttributeCertificate::new(&root)?;
            ac.common()?
        };

        out.finish(raw);
        Ok(out)
    }

    fn finish(&mut self, raw: Vec<u8>) {
        self.issuer_sorted = name::sort_dn(Some(&self.issuer));
        self.subject_sorted = self.subject.as_deref().map(|s| name::sort_dn(Some(s)));
        self.content_hash = content_hash(&raw);
        self.raw = raw;
    }

    /// Whether `instant` falls inside the validity window, both ends inclusive.
    pub fn is_valid_on(&self, instant: DateTime<Utc>) -> bool {
        self.not_before <= instant && instant <= self.not_after
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject_sorted.as_deref() == Some(self.issuer_sorted.as_str())
    }

    /// Checks that the key of `issuer` produced this credential's signature.
    ///
    /// Only the signature is checked, names and validity are left to the
    /// caller.
    pub fn is_issuer(&self, issuer: &Common) -> Result<(), VerificationFailure> {
        let verified = match (self.certificate_type, issuer.certificate_type) {
            (CertificateType::X509Certificate, CertificateType::X509Certificate) => self.verify_x509(issuer),
            (CertificateType::Invalid, _) => Err(anyhow!("credential type is unknown")),
            _ => self.verify_signed(issuer),
        };

        verified.map_err(|e| {
            debug!(issuer = %issuer.subject.as_deref().unwrap_or(name::BLANK), "signature check failed: {e}");
            VerificationFailure::signature()
        })
    }

    fn verify_x509(&self, issuer: &Common) -> anyhow::Result<()> {
        let cert = x509::Certificate::from_der(&self.raw)?;
        let issuer = x509::Certificate::from_der(&issuer.raw)?;
        issuer.tbs_certificate.verify_signature(&cert)
    }

    /// Verifies the retained signed bytes, which is the only way to check
    /// an attribute certificate.
    fn verify_signed(&self, issuer: &Common) -> anyhow::Result<()> {
        let spki = issuer
            .public_key_info
            .as_deref()
            .ok_or_else(|| anyhow!("issuer has no public key"))?;
        let spki = SubjectPublicKeyInfo::from_der(spki)?;
        let algo = AlgorithmIdentifier::from_der(&self.signature_algorithm_der)?;
        spki.verify(&self.signed, algo, &self.signature)
    }
}

/// A borrowed view of an attribute certificate's layout.
pub(crate) struct AttributeCertificate<'r, 'a> {
    outer: &'r [Element<'a>],
    info: &'r asn1::Constructed<'a>,
}

impl<'r, 'a> AttributeCertificate<'r, 'a> {
    pub fn new(root: &'r Element<'a>) -> Result<Self, DecodeError> {
        let outer = root.expect_sequence("attribute certificate")?;
        let info = match outer.first() {
            Some(Element::Sequence(info)) if outer.len() == 3 => info,
            _ => {
                return Err(DecodeError::illegal(
                    "Required attribute certificate info field not found in provided attribute certificate.",
                ))
            }
        };

        if info.elements.len() < 7 {
            return Err(DecodeError::illegal("attribute certificate info is truncated"));
        }

        Ok(Self { outer, info })
    }

    fn field(&self, index: usize) -> &'r Element<'a> {
        &self.info.elements[index]
    }

    /// Each attribute's type and the elements of its value SET.
    pub fn attributes(&self) -> Result<Vec<(ObjectIdentifier, &'r [Element<'a>])>, DecodeError> {
        self.field(6)
            .expect_sequence("attributes")?
            .iter()
            .map(|attr| match attr.expect_sequence("attribute")? {
                [kind, Element::Set(values)] => Ok((kind.expect_oid("attribute type")?, &values.elements[..])),
                _ => Err(DecodeError::illegal("attribute does not have required values.")),
            })
            .collect()
    }

    /// The inner value of every extension, keyed by its id.
    pub fn extensions(&self) -> Result<Vec<(ObjectIdentifier, &'a [u8])>, DecodeError> {
        let list = match self.info.elements.get(7..).and_then(|rest| rest.iter().find_map(Element::as_sequence)) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };

        list.iter()
            .map(|ext| {
                let fields = ext.expect_sequence("extension")?;
                match (fields.first(), fields.last()) {
                    (Some(id), Some(Element::OctetString(value))) => Ok((id.expect_oid("extension id")?, *value)),
                    _ => Err(DecodeError::illegal("extension does not have required values.")),
                }
            })
            .collect()
    }

    pub fn extension(&self, oid: ObjectIdentifier) -> Result<Option<&'a [u8]>, DecodeError> {
        Ok(self.extensions()?.into_iter().find(|(id, _)| *id == oid).map(|(_, v)| v))
    }

    fn holder(&self) -> Result<(BigUint, Option<String>), DecodeError> {
        let holder = self.field(1).expect_sequence("holder")?;
        for field in holder {
            if let Some(t) = field.as_tagged().filter(|t| t.number == 0) {
                if let [issuer, Element::Integer(serial), ..] = &t.implicit_sequence()?[..] {
                    let issuer = name::general_names(issuer.expect_sequence("holder issuer")?)?;
                    return Ok((serial.to_unsigned(), issuer));
                }
            }
        }

        Ok((BigUint::from(0u32), None))
    }

    fn issuer(&self) -> Result<String, DecodeError> {
        let names = match self.field(2) {
            Element::Sequence(v1) => name::general_names(&v1.elements)?,
            Element::Tagged(v2) if v2.number == 0 => match v2.implicit_sequence()?.first() {
                Some(Element::Sequence(names)) => name::general_names(&names.elements)?,
                _ => None,
            },
            _ => None,
        };

        names.ok_or_else(|| DecodeError::illegal("attribute certificate issuer has no names"))
    }

    fn common(&self) -> Result<Common> {
        let algorithm = &self.outer[1];
        let algorithm_oid = algorithm
            .expect_sequence("signature algorithm")?
            .first()
            .map(|e| e.expect_oid("signature algorithm"))
            .transpose()?
            .ok_or_else(|| DecodeError::illegal("signature algorithm is empty"))?;

        let signature = match &self.outer[2] {
            Element::BitString(bits) => bits.get(1..).unwrap_or_default().to_vec(),
            other => {
                return Err(DecodeError::illegal(format!(
                    "signature: expected BIT STRING, found {}",
                    other.kind()
                ))
                .into())
            }
        };

        let validity = self.field(5).expect_sequence("validity")?;
        let (not_before, not_after) = match validity {
            [start, end] => (start.as_time()?, end.as_time()?),
            _ => return Err(DecodeError::InvalidDate("validity period".into()).into()),
        };

        let serial = match self.field(4) {
            Element::Integer(i) => i.to_unsigned(),
            other => {
                return Err(DecodeError::illegal(format!("serial: expected INTEGER, found {}", other.kind())).into())
            }
        };

        let (holder_serial_number, holder_issuer) = self.holder()?;

        let mut out = Common {
            certificate_type: CertificateType::X509AttributeCertificate,
            version: self.field(0).expect_int("version")?,
            serial_number: serial,
            issuer: self.issuer()?,
            signature_algorithm: signature_algorithm_name(&algorithm_oid).map(Into::into),
            signature_algorithm_oid: algorithm_oid.to_string(),
            signature,
            not_before,
            not_after,
            holder_serial_number,
            holder_issuer,
            signed: self.info.encoded.to_vec(),
            signature_algorithm_der: match algorithm {
                Element::Sequence(c) => c.encoded.to_vec(),
                _ => Vec::new(),
            },
            ..Default::default()
        };

        if let Some(v) = self.extension(ID_CE_AUTHORITY_KEY_IDENTIFIER)? {
            let (id, serial) = authority_key_identifier(v)?;
            out.authority_key_identifier = id;
            out.authority_serial_number = serial.unwrap_or_else(|| BigUint::from(0u32));
        }
        if let Some(v) = self.extension(ID_PE_AUTHORITY_INFO_ACCESS)? {
            out.authority_info_access = authority_info_access(v)?;
        }

        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::asn1::tests::*;

    use rstest::rstest;

    #[rstest]
    #[case("1.2.840.113549.1.1.11", Some("SHA256WithRSA"))]
    #[case("1.2.840.113549.1.1.16", Some("SHA512-256WithRSA"))]
    #[case("1.2.840.10045.4.1", Some("SHA224WithECDSA"))]
    #[case("1.2.840.10045.4.3.3", None)]
    fn signature_algorithm_table(#[case] oid: &str, #[case] expected: Option<&str>) {
        assert_eq!(signature_algorithm_name(&ObjectIdentifier::new_unwrap(oid)), expected);
    }

    #[test]
    fn key_usage_is_newline_terminated() {
        let ku = KeyUsage((KeyUsages::KeyCertSign | KeyUsages::DigitalSignature).into());
        assert_eq!(key_usage(&ku), "DIGITAL SIGNATURE\nKEY CERT SIGN\n");
    }

    #[test]
    fn distribution_point_uris() {
        let uri = implicit(6, b"http://crl.example.com/ca.crl");
        let der = seq(&[seq(&[constructed(0, &constructed(0, &uri))])]);
        assert_eq!(crl_points(&der).unwrap(), ["http://crl.example.com/ca.crl"]);
    }

    #[test]
    fn authority_key_identifier_parts() {
        let der = seq(&[implicit(0, &[0xca, 0xfe]), implicit(2, &[0x01, 0x00])]);
        let (id, serial) = authority_key_identifier(&der).unwrap();
        assert_eq!(id.as_deref(), Some("cafe"));
        assert_eq!(serial, Some(BigUint::from(256u32)));
    }

    #[test]
    fn info_access_pairs_method_and_uri() {
        let der = seq(&[seq(&[oid("1.3.6.1.5.5.7.48.2"), implicit(6, b"http://ca.example.com/ca.cer")])]);
        assert_eq!(
            authority_info_access(&der).unwrap(),
            ["1.3.6.1.5.5.7.48.2 http://ca.example.com/ca.cer"]
        );
    }
}
