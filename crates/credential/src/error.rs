// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures raised while turning bytes into a credential.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("cryptographic failure: {0}")]
    Crypto(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed certificate detected. No certificate length field could be found.")]
    TruncatedLength,

    #[error("Malformed certificate detected. Certificate is nothing more than ASN.1 Sequence.")]
    BareSequenceOnly,

    #[error("Malformed certificate detected. Value of certificate length field extends beyond length of provided certificate.")]
    LengthExceedsBuffer,

    #[error("{0}")]
    UnrecognizedTaggedObject(&'static str),

    #[error("{0}")]
    InvalidEnumValue(String),

    #[error("unsupported algorithm oid: {0}")]
    UnsupportedAlgorithmOid(String),

    #[error("{0}")]
    IllegalEncoding(String),

    #[error("unable to recover date: {0}")]
    InvalidDate(String),

    #[error("der: {0}")]
    Der(#[from] der::Error),
}

impl DecodeError {
    pub(crate) fn illegal(msg: impl Into<String>) -> Self {
        Self::IllegalEncoding(msg.into())
    }
}

impl From<der::Error> for Error {
    fn from(e: der::Error) -> Self {
        Self::Decode(DecodeError::Der(e))
    }
}

/// The reason a credential could not be shown to be issued by a candidate.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct VerificationFailure(pub String);

impl VerificationFailure {
    pub fn signature() -> Self {
        Self("Certificate signature failed to verify".into())
    }
}
