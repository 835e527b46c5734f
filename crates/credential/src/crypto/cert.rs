// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use super::*;

use anyhow::{anyhow, Result};
use const_oid::ObjectIdentifier;
use der::{Decode, Encode};
use x509::{Certificate, TbsCertificate};

pub trait TbsCertificateExt<'a> {
    /// Decodes the first extension with the specified oid, if any.
    fn extension<T: Decode<'a>>(&self, oid: ObjectIdentifier) -> Result<Option<T>>;

    /// The raw value of the first extension with the specified oid.
    fn extension_value(&self, oid: ObjectIdentifier) -> Option<&'a [u8]>;

    /// Verifies that `cert` carries a signature made with this certificate's key
    ///
    /// Only the signature is checked. Validity windows and constraints are
    /// policy decisions left to the caller.
    fn verify_signature(&self, cert: &Certificate<'_>) -> Result<()>;
}

impl<'a> TbsCertificateExt<'a> for TbsCertificate<'a> {
    fn extension<T: Decode<'a>>(&self, oid: ObjectIdentifier) -> Result<Option<T>> {
        self.extension_value(oid)
            .map(|v| T::from_der(v).map_err(|e| anyhow!("extension {oid}: {e}")))
            .transpose()
    }

    fn extension_value(&self, oid: ObjectIdentifier) -> Option<&'a [u8]> {
        self.extensions
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .find(|e| e.extn_id == oid)
            .map(|e| e.extn_value)
    }

    fn verify_signature(&self, cert: &Certificate<'_>) -> Result<()> {
        let body = cert.tbs_certificate.to_vec()?;
        let sign = cert
            .signature
            .as_bytes()
            .ok_or_else(|| anyhow!("invalid signature"))?;

        self.subject_public_key_info
            .verify(&body, cert.signature_algorithm, sign)
    }
}
