// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Decoding of TCG credentials.
//!
//! Endorsement credentials and certificate authorities are X.509
//! certificates. Platform credentials are X.509 attribute certificates
//! whose TCG attributes describe the hardware of a platform.

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications, clippy::all)]

pub mod asn1;
pub mod attributes;
pub mod classify;
pub mod crypto;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod model;
pub mod name;

pub use classify::{classify, CertificateType};
pub use error::{DecodeError, Error, Result, VerificationFailure};
pub use model::{CaCredential, Common, Credential, CredentialKind, EndorsementCredential, PlatformCredential};

pub use const_oid;
pub use x509;
