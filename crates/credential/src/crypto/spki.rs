// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, bail, Result};
use const_oid::ObjectIdentifier;
use der::{asn1::AnyRef, Sequence};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::RsaPublicKey;
use spki::{AlgorithmIdentifier, SubjectPublicKeyInfo};

use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, ID_EC_PUBLIC_KEY as ECPK, ID_MGF_1, ID_RSASSA_PSS,
    ID_SHA_256, ID_SHA_384, ID_SHA_512, RSA_ENCRYPTION as RSA, SECP_256_R_1 as P256,
    SECP_384_R_1 as P384, SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION,
    SHA_512_WITH_RSA_ENCRYPTION,
};

#[derive(Clone, Debug, PartialEq, Eq, Sequence)]
struct RsaSsaPssParams<'a> {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    hash_algorithm: AlgorithmIdentifier<'a>,

    #[asn1(context_specific = "1", tag_mode = "EXPLICIT")]
    mask_algorithm: AlgorithmIdentifier<'a>,

    #[asn1(context_specific = "2", tag_mode = "EXPLICIT")]
    salt_length: u32,

    #[asn1(context_specific = "3", tag_mode = "EXPLICIT")]
    trailer_field: u32,
}

/// Digests accepted on RSA-signed credentials.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Hash {
    Sha256,
    Sha384,
    Sha512,
}

impl Hash {
    /// The digest of a PKCS#1 v1.5 signature algorithm.
    fn of_pkcs1v15(oid: ObjectIdentifier) -> Option<Self> {
        match oid {
            SHA_256_WITH_RSA_ENCRYPTION => Some(Self::Sha256),
            SHA_384_WITH_RSA_ENCRYPTION => Some(Self::Sha384),
            SHA_512_WITH_RSA_ENCRYPTION => Some(Self::Sha512),
            _ => None,
        }
    }

    fn of_digest(oid: ObjectIdentifier) -> Option<Self> {
        match oid {
            ID_SHA_256 => Some(Self::Sha256),
            ID_SHA_384 => Some(Self::Sha384),
            ID_SHA_512 => Some(Self::Sha512),
            _ => None,
        }
    }

    fn oid(self) -> ObjectIdentifier {
        match self {
            Self::Sha256 => ID_SHA_256,
            Self::Sha384 => ID_SHA_384,
            Self::Sha512 => ID_SHA_512,
        }
    }

    fn salt_len(self) -> u32 {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Reads RSASSA-PSS parameters, accepting only MGF1 over the same
    /// digest with a digest-sized salt.
    fn of_pss(params: AnyRef<'_>) -> Result<Self> {
        let params: RsaSsaPssParams<'_> = params.decode_into()?;
        let hash = match params.hash_algorithm.oids()? {
            (oid, None) => Self::of_digest(oid),
            _ => None,
        }
        .ok_or_else(|| anyhow!("unsupported PSS hash"))?;

        let mask = match (params.mask_algorithm.oid, params.mask_algorithm.parameters) {
            (ID_MGF_1, Some(p)) => p.decode_into::<AlgorithmIdentifier<'_>>()?,
            _ => bail!("unsupported PSS mask algorithm"),
        };
        if mask.oids()? != (hash.oid(), None) || params.salt_length != hash.salt_len() || params.trailer_field != 1 {
            bail!("unsupported PSS mask parameters");
        }

        Ok(hash)
    }
}

fn verify_pkcs1v15(key: RsaPublicKey, hash: Hash, body: &[u8], sign: &[u8]) -> Result<()> {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use signature::Verifier;

    let sign = Signature::from(Box::from(sign));
    match hash {
        Hash::Sha256 => VerifyingKey::<sha2::Sha256>::new_with_prefix(key).verify(body, &sign)?,
        Hash::Sha384 => VerifyingKey::<sha2::Sha384>::new_with_prefix(key).verify(body, &sign)?,
        Hash::Sha512 => VerifyingKey::<sha2::Sha512>::new_with_prefix(key).verify(body, &sign)?,
    }
    Ok(())
}

fn verify_pss(key: RsaPublicKey, hash: Hash, body: &[u8], sign: &[u8]) -> Result<()> {
    use rsa::pss::{Signature, VerifyingKey};
    use signature::Verifier;

    let sign = Signature::from(Box::from(sign));
    match hash {
        Hash::Sha256 => VerifyingKey::<sha2::Sha256>::new(key).verify(body, &sign)?,
        Hash::Sha384 => VerifyingKey::<sha2::Sha384>::new(key).verify(body, &sign)?,
        Hash::Sha512 => VerifyingKey::<sha2::Sha512>::new(key).verify(body, &sign)?,
    }
    Ok(())
}

pub trait SubjectPublicKeyInfoExt {
    /// Verifies a signature
    ///
    /// The signature is the content of the signature BIT STRING exactly as
    /// it appears in a certificate or an attribute certificate.
    fn verify(&self, body: &[u8], algo: AlgorithmIdentifier<'_>, signature: &[u8]) -> Result<()>;
}

impl SubjectPublicKeyInfoExt for SubjectPublicKeyInfo<'_> {
    fn verify(&self, body: &[u8], algo: AlgorithmIdentifier<'_>, sign: &[u8]) -> Result<()> {
        match (self.algorithm.oids()?, algo.oid) {
            ((ECPK, Some(P256)), ECDSA_WITH_SHA_256) => {
                use p256::ecdsa::signature::Verifier;
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(self.subject_public_key)?;
                key.verify(body, &p256::ecdsa::Signature::from_der(sign)?)?;
                Ok(())
            }

            ((ECPK, Some(P384)), ECDSA_WITH_SHA_384) => {
                use p384::ecdsa::signature::Verifier;
                let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(self.subject_public_key)?;
                key.verify(body, &p384::ecdsa::Signature::from_der(sign)?)?;
                Ok(())
            }

            // Most TPM vendor CAs still sign with PKCS#1 v1.5.
            ((RSA, None), oid) => {
                let key = RsaPublicKey::from_pkcs1_der(self.subject_public_key)?;
                match (Hash::of_pkcs1v15(oid), algo.parameters) {
                    (Some(hash), _) => verify_pkcs1v15(key, hash, body, sign),
                    (None, Some(params)) if oid == ID_RSASSA_PSS => verify_pss(key, Hash::of_pss(params)?, body, sign),
                    _ => bail!("unsupported signature algorithm {oid} for an RSA key"),
                }
            }

            (_, oid) => bail!("unsupported signature algorithm {oid}"),
        }
    }
}
