// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Supply chain validation of a device's TCG credentials.
//!
//! Certificate authorities are found in a [`CredentialStore`] by the
//! [`TrustChainResolver`]. The [`SupplyChainValidationEngine`] runs the
//! checks a [`PolicyConfig`] enables and records a summary of the outcome.

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications, clippy::all)]

pub mod config;
pub mod device;
pub mod engine;
pub mod resolver;
pub mod store;
pub mod summary;
pub mod validator;

pub use config::{PolicyConfig, StoreConfig};
pub use device::{ComponentInfo, DeviceInfo, HardwareInfo};
pub use engine::SupplyChainValidationEngine;
pub use resolver::{Keystore, TrustChainResolver};
pub use store::{CredentialStore, MemoryStore, RetryingStore, StoreError};
pub use summary::{
    Appraisal, SupplyChainValidation, SupplyChainValidationSummary, ValidationResult, ValidationType,
};
pub use validator::{validate_cert_chain, CredentialValidator, SupplyChainCredentialValidator};
