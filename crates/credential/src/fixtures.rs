// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Credentials generated at run time for tests.
//!
//! Every key is P-256. Certificates are valid for an hour either side of
//! now unless a window is given.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};
use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_BASIC_CONSTRAINTS, ID_CE_KEY_USAGE,
    ID_CE_SUBJECT_ALT_NAME, ID_CE_SUBJECT_KEY_IDENTIFIER,
};
use const_oid::ObjectIdentifier;
use der::asn1::{BitStringRef, GeneralizedTime, OctetStringRef, UIntRef};
use der::{Decode, Encode};
use sec1::pkcs8::{EncodePrivateKey, PrivateKeyInfo, SubjectPublicKeyInfo};
use sec1::EcPrivateKey;
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifier;
use x509::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages};
use x509::name::RdnSequence;
use x509::time::{Time, Validity};
use x509::{Certificate, TbsCertificate};
use zeroize::Zeroizing;

use self::der_writer::*;

const CERTIFICATE_POLICIES: &str = "2.5.29.32";
const SUBJECT_DIRECTORY_ATTRIBUTES: &str = "2.5.29.9";
const TCG_REGISTRY: &str = "2.23.133.18.3.1";
const TCG_2_0: &str = "TCG Trusted Platform Endorsement";

static NEXT_SERIAL: AtomicU8 = AtomicU8::new(1);

/// Minimal DER writer for hand-built TCG structures.
pub mod der_writer {
    use super::*;

    pub fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        match body.len() {
            n if n < 0x80 => out.push(n as u8),
            n if n <= 0xff => out.extend([0x81, n as u8]),
            n => out.extend([0x82, (n >> 8) as u8, n as u8]),
        }
        out.extend_from_slice(body);
        out
    }

    pub fn seq(parts: &[Vec<u8>]) -> Vec<u8> {
        tlv(0x30, &parts.concat())
    }

    pub fn set(parts: &[Vec<u8>]) -> Vec<u8> {
        tlv(0x31, &parts.concat())
    }

    /// Minimal two's complement content octets of an unsigned byte.
    fn unsigned(v: u8) -> Vec<u8> {
        if v & 0x80 != 0 {
            vec![0x00, v]
        } else {
            vec![v]
        }
    }

    pub fn int(v: u8) -> Vec<u8> {
        tlv(0x02, &unsigned(v))
    }

    pub fn enumerated(v: u8) -> Vec<u8> {
        tlv(0x0a, &unsigned(v))
    }

    pub fn boolean(v: bool) -> Vec<u8> {
        tlv(0x01, &[if v { 0xff } else { 0x00 }])
    }

    pub fn utf8(s: &str) -> Vec<u8> {
        tlv(0x0c, s.as_bytes())
    }

    pub fn ia5(s: &str) -> Vec<u8> {
        tlv(0x16, s.as_bytes())
    }

    pub fn octets(b: &[u8]) -> Vec<u8> {
        tlv(0x04, b)
    }

    pub fn oid(s: &str) -> Vec<u8> {
        tlv(0x06, ObjectIdentifier::new_unwrap(s).as_bytes())
    }

    /// `[n]` with primitive implicit contents.
    pub fn implicit(n: u8, body: &[u8]) -> Vec<u8> {
        tlv(0x80 | n, body)
    }

    /// `[n]` constructed, either explicit or an implicit SEQUENCE body.
    pub fn constructed(n: u8, body: &[u8]) -> Vec<u8> {
        tlv(0xa0 | n, body)
    }

    pub fn generalized_time(t: SystemTime) -> Vec<u8> {
        let t = chrono::DateTime::<chrono::Utc>::from(t);
        tlv(0x18, t.format("%Y%m%d%H%M%SZ").to_string().as_bytes())
    }
}

/// One hour either side of now.
pub fn window() -> (SystemTime, SystemTime) {
    let now = SystemTime::now();
    let hour = Duration::from_secs(60 * 60);
    (now - hour, now + hour)
}

fn next_serial() -> u8 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed) % 0x7f + 1
}

/// The signature algorithm of every fixture issuer.
pub const ES256: AlgorithmIdentifier<'static> = AlgorithmIdentifier {
    oid: ECDSA_WITH_SHA_256,
    parameters: None,
};

/// A P-256 private key, kept as its PKCS#8 encoding.
pub struct SigningKey(Zeroizing<Vec<u8>>);

impl SigningKey {
    pub fn generate() -> Result<Self> {
        let doc = p256::SecretKey::random(rand::thread_rng())
            .to_pkcs8_der()
            .map_err(|e| anyhow!("{e:?}"))?;
        Ok(Self(doc.to_bytes()))
    }

    fn ec(&self) -> Result<(PrivateKeyInfo<'_>, EcPrivateKey<'_>)> {
        let info = PrivateKeyInfo::from_der(&self.0)?;
        let ec = EcPrivateKey::from_der(info.private_key)?;
        Ok((info, ec))
    }

    pub fn public_key(&self) -> Result<SubjectPublicKeyInfo<'_>> {
        let (info, ec) = self.ec()?;
        let key = ec.public_key.ok_or_else(|| anyhow!("missing public key"))?;
        Ok(SubjectPublicKeyInfo {
            algorithm: info.algorithm,
            subject_public_key: key,
        })
    }

    /// An ES256 signature in its DER form.
    pub fn sign(&self, body: &[u8]) -> Result<Vec<u8>> {
        use p256::ecdsa::signature::Signer;

        let (_, ec) = self.ec()?;
        let key = p256::ecdsa::SigningKey::from_bytes(ec.private_key)?;
        let signature: p256::ecdsa::Signature = key.sign(body);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Wraps `tbs` in a certificate signed by this key.
    fn certify(&self, tbs: TbsCertificate<'_>) -> Result<Vec<u8>> {
        let algorithm = tbs.signature;
        let signature = self.sign(&tbs.to_vec()?)?;
        let cert = Certificate {
            tbs_certificate: tbs,
            signature_algorithm: algorithm,
            signature: BitStringRef::from_bytes(&signature)?,
        };
        Ok(cert.to_vec()?)
    }
}

fn key_identifier(key: &SigningKey) -> Result<Vec<u8>> {
    let spki = key.public_key()?;
    Ok(Sha256::digest(spki.subject_public_key)[..20].to_vec())
}

/// A version 2.0 component identifier in the TCG registry.
pub fn component(class: &[u8], manufacturer: &str, model: &str, serial: Option<&str>, status: Option<u8>) -> Vec<u8> {
    let mut parts = vec![seq(&[oid(TCG_REGISTRY), octets(class)]), utf8(manufacturer), utf8(model)];
    if let Some(serial) = serial {
        parts.push(implicit(0, serial.as_bytes()));
    }
    if let Some(status) = status {
        parts.push(implicit(7, &[status]));
    }
    seq(&parts)
}

/// A version 1.2 component identifier.
pub fn component_v1(manufacturer: &str, model: &str, serial: Option<&str>) -> Vec<u8> {
    let mut parts = vec![utf8(manufacturer), utf8(model)];
    if let Some(serial) = serial {
        parts.push(implicit(0, serial.as_bytes()));
    }
    seq(&parts)
}

/// Subject alternative name and TPM specification extensions of an
/// endorsement credential.
pub fn endorsement_extensions(manufacturer: &str, model: &str, version: &str) -> Vec<(ObjectIdentifier, Vec<u8>)> {
    let san = seq(&[constructed(
        4,
        &seq(&[
            set(&[seq(&[oid("2.23.133.2.1"), utf8(manufacturer)])]),
            set(&[seq(&[oid("2.23.133.2.2"), utf8(model)])]),
            set(&[seq(&[oid("2.23.133.2.3"), utf8(version)])]),
        ]),
    )]);
    let sda = seq(&[seq(&[
        oid("2.23.133.2.16"),
        set(&[seq(&[utf8("2.0"), int(0), int(116)])]),
    ])]);

    vec![
        (ID_CE_SUBJECT_ALT_NAME, san),
        (ObjectIdentifier::new_unwrap(SUBJECT_DIRECTORY_ATTRIBUTES), sda),
    ]
}

/// What goes into a generated platform credential.
#[derive(Clone, Debug)]
pub struct PlatformFields<'a> {
    pub credential_type: &'a str,
    pub manufacturer: &'a str,
    pub model: &'a str,
    pub version: &'a str,
    pub serial: &'a str,
    /// `Some(true)` for a base credential, `Some(false)` for a delta.
    pub base: Option<bool>,
    /// Encoded component identifiers for the platform configuration.
    pub components: Vec<Vec<u8>>,
    pub holder_serial: u8,
    pub window: (SystemTime, SystemTime),
}

impl Default for PlatformFields<'_> {
    fn default() -> Self {
        Self {
            credential_type: TCG_2_0,
            manufacturer: "Example Inc.",
            model: "Example Server",
            version: "1.0",
            serial: "S1",
            base: Some(true),
            components: Vec::new(),
            holder_serial: 1,
            window: window(),
        }
    }
}

fn attribute(id: &str, value: Vec<u8>) -> Vec<u8> {
    seq(&[oid(id), set(&[value])])
}

fn extension(id: ObjectIdentifier, value: &[u8]) -> Vec<u8> {
    seq(&[tlv(0x06, id.as_bytes()), octets(value)])
}

/// A generated key and the certificate carrying its public half.
pub struct KeyPair {
    key: SigningKey,
    pub cert: Vec<u8>,
}

impl KeyPair {
    /// A self-signed certificate authority.
    pub fn root(subject: &str) -> Result<Self> {
        Self::build(None, subject, true, &[], window())
    }

    /// A certificate for a fresh key, signed by this one.
    pub fn issue(&self, subject: &str, ca: bool) -> Result<Self> {
        Self::build(Some(self), subject, ca, &[], window())
    }

    pub fn issue_with(
        &self,
        subject: &str,
        ca: bool,
        extra: &[(ObjectIdentifier, Vec<u8>)],
        window: (SystemTime, SystemTime),
    ) -> Result<Self> {
        Self::build(Some(self), subject, ca, extra, window)
    }

    fn build(
        issuer: Option<&KeyPair>,
        subject: &str,
        ca: bool,
        extra: &[(ObjectIdentifier, Vec<u8>)],
        (start, end): (SystemTime, SystemTime),
    ) -> Result<Self> {
        let key = SigningKey::generate()?;
        let signer = match issuer {
            Some(i) => &i.key,
            None => &key,
        };

        let subject = RdnSequence::encode_from_string(subject)?;
        let subject = RdnSequence::from_der(&subject)?;
        let issuer_cert = issuer.map(|i| Certificate::from_der(&i.cert)).transpose()?;
        let issuer_name = match &issuer_cert {
            Some(cert) => cert.tbs_certificate.subject.clone(),
            None => subject.clone(),
        };

        // Create the extensions.
        let ku = if ca {
            KeyUsage((KeyUsages::KeyCertSign | KeyUsages::CRLSign).into())
        } else {
            KeyUsage(KeyUsages::DigitalSignature.into())
        }
        .to_vec()?;
        let bc = BasicConstraints {
            ca,
            path_len_constraint: None,
        }
        .to_vec()?;
        let ski = key_identifier(&key)?;
        let ski = OctetStringRef::new(&ski)?.to_vec()?;
        let aki = seq(&[implicit(0, &key_identifier(signer)?)]);

        let mut values = vec![
            (ID_CE_KEY_USAGE, true, ku),
            (ID_CE_BASIC_CONSTRAINTS, true, bc),
            (ID_CE_SUBJECT_KEY_IDENTIFIER, false, ski),
            (ID_CE_AUTHORITY_KEY_IDENTIFIER, false, aki),
        ];
        values.extend(extra.iter().map(|(id, value)| (*id, false, value.clone())));

        let serial = [next_serial()];
        let tbs = TbsCertificate {
            version: x509::Version::V3,
            serial_number: UIntRef::new(&serial)?,
            signature: ES256,
            issuer: issuer_name,
            validity: Validity {
                not_before: Time::GeneralTime(GeneralizedTime::from_system_time(start)?),
                not_after: Time::GeneralTime(GeneralizedTime::from_system_time(end)?),
            },
            subject,
            subject_public_key_info: key.public_key()?,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(
                values
                    .iter()
                    .map(|(id, critical, value)| x509::ext::Extension {
                        extn_id: *id,
                        critical: *critical,
                        extn_value: value,
                    })
                    .collect(),
            ),
        };

        let cert = signer.certify(tbs)?;
        Ok(Self { key, cert })
    }

    /// An endorsement credential for a TPM, signed by this key.
    pub fn endorsement(&self, manufacturer: &str, model: &str, version: &str) -> Result<Self> {
        let extra = endorsement_extensions(manufacturer, model, version);
        self.issue_with("CN=TPM Endorsement Key", false, &extra, window())
    }

    /// A platform attribute certificate signed by this key.
    pub fn platform(&self, fields: &PlatformFields<'_>) -> Result<Vec<u8>> {
        let algorithm = ES256;
        let issuer = Certificate::from_der(&self.cert)?;
        let names = seq(&[constructed(4, &issuer.tbs_certificate.subject.to_vec()?)]);

        let v2 = fields.credential_type == TCG_2_0;
        let (manufacturer, model, version, serial) = match v2 {
            true => ("2.23.133.5.1.1", "2.23.133.5.1.4", "2.23.133.5.1.5", "2.23.133.5.1.6"),
            false => ("2.23.133.2.4", "2.23.133.2.5", "2.23.133.2.6", "2.23.133.2.23"),
        };
        let san = seq(&[constructed(
            4,
            &seq(&[
                set(&[seq(&[oid(manufacturer), utf8(fields.manufacturer)])]),
                set(&[seq(&[oid(model), utf8(fields.model)])]),
                set(&[seq(&[oid(version), utf8(fields.version)])]),
                set(&[seq(&[oid(serial), utf8(fields.serial)])]),
            ]),
        )]);
        let policies = seq(&[seq(&[
            oid("2.23.133.1.2"),
            seq(&[
                seq(&[oid("1.3.6.1.5.5.7.2.1"), ia5("https://pki.example.com/platform/cps.html")]),
                seq(&[oid("1.3.6.1.5.5.7.2.2"), seq(&[utf8(fields.credential_type)])]),
            ]),
        ])]);

        let mut attributes = vec![
            attribute("2.23.133.2.17", seq(&[seq(&[int(2), int(0), int(1)]), octets(&[0, 0, 0, 1])])),
            attribute("2.23.133.2.23", seq(&[int(1), int(1), int(11)])),
        ];
        if let Some(base) = fields.base {
            let kind = if base { "2.23.133.8.2" } else { "2.23.133.8.5" };
            attributes.push(attribute("2.23.133.2.25", seq(&[oid(kind)])));
        }
        let configuration = if v2 { "2.23.133.5.1.7.2" } else { "2.23.133.5.1.7.1" };
        attributes.push(attribute(
            configuration,
            seq(&[constructed(0, &fields.components.concat())]),
        ));

        let aki = seq(&[implicit(0, &key_identifier(&self.key)?)]);
        let extensions = seq(&[
            extension(ObjectIdentifier::new_unwrap(CERTIFICATE_POLICIES), &policies),
            extension(ID_CE_SUBJECT_ALT_NAME, &san),
            extension(ID_CE_AUTHORITY_KEY_IDENTIFIER, &aki),
        ]);

        let (start, end) = fields.window;
        let info = seq(&[
            int(1),
            seq(&[constructed(0, &[names.clone(), int(fields.holder_serial)].concat())]),
            constructed(0, &names),
            algorithm.to_vec()?,
            int(next_serial()),
            seq(&[generalized_time(start), generalized_time(end)]),
            seq(&attributes),
            extensions,
        ]);

        let signature = self.key.sign(&info)?;
        let bits = [&[0u8][..], &signature].concat();
        Ok(seq(&[info, algorithm.to_vec()?, tlv(0x03, &bits)]))
    }
}
