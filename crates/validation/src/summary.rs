// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Outcomes of a supply chain validation run.

use std::fmt;

use chrono::{DateTime, Utc};
use credential::{Common, Credential, CredentialKind, EndorsementCredential, PlatformCredential};
use serde::Serialize;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationType {
    EndorsementCredential,
    PlatformCredential,
    PlatformCredentialAttributes,
    Firmware,
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EndorsementCredential => "ENDORSEMENT_CREDENTIAL",
            Self::PlatformCredential => "PLATFORM_CREDENTIAL",
            Self::PlatformCredentialAttributes => "PLATFORM_CREDENTIAL_ATTRIBUTES",
            Self::Firmware => "FIRMWARE",
        })
    }
}

/// Ordered so that the more severe outcome compares greater.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationResult {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
        })
    }
}

/// A result together with the text explaining it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Appraisal {
    pub result: ValidationResult,
    pub message: String,
}

impl Appraisal {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            result: ValidationResult::Pass,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            result: ValidationResult::Fail,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: ValidationResult::Error,
            message: message.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.result == ValidationResult::Pass
    }
}

/// Identifies a credential consulted by a check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialRef {
    pub kind: CredentialKind,
    pub serial_number: String,
    pub issuer: String,
    pub type_hash: String,
}

impl CredentialRef {
    fn new(kind: CredentialKind, common: &Common) -> Self {
        Self {
            kind,
            serial_number: common.serial_number.to_string(),
            issuer: common.issuer.clone(),
            type_hash: credential::model::type_hash(&common.content_hash, kind),
        }
    }
}

impl From<&Credential> for CredentialRef {
    fn from(value: &Credential) -> Self {
        Self::new(value.kind(), value.common())
    }
}

impl From<&EndorsementCredential> for CredentialRef {
    fn from(value: &EndorsementCredential) -> Self {
        Self::new(CredentialKind::Endorsement, &value.common)
    }
}

impl From<&PlatformCredential> for CredentialRef {
    fn from(value: &PlatformCredential) -> Self {
        Self::new(CredentialKind::Platform, &value.common)
    }
}

/// The outcome of one check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SupplyChainValidation {
    pub validation_type: ValidationType,
    pub result: ValidationResult,
    pub credentials: Vec<CredentialRef>,
    pub message: String,
}

impl SupplyChainValidation {
    pub fn new(
        validation_type: ValidationType,
        appraisal: Appraisal,
        credentials: Vec<CredentialRef>,
    ) -> Self {
        Self {
            validation_type,
            result: appraisal.result,
            credentials,
            message: appraisal.message,
        }
    }

    pub fn appraisal(&self) -> Appraisal {
        Appraisal {
            result: self.result,
            message: self.message.clone(),
        }
    }
}

/// Folds individual checks into one verdict.
///
/// The first ERROR wins outright. Otherwise every FAIL contributes the
/// name of its check, one per line. With neither, the verdict is PASS
/// with an empty message.
pub fn calculate_validation_result(validations: &[SupplyChainValidation]) -> Appraisal {
    let mut failures = String::new();
    let mut failed = false;

    for validation in validations {
        match validation.result {
            ValidationResult::Error => return Appraisal::error(validation.message.clone()),
            ValidationResult::Fail => {
                failed = true;
                failures.push_str(&format!("{}\n", validation.validation_type));
            }
            ValidationResult::Pass => (),
        }
    }

    if failed {
        Appraisal::fail(failures)
    } else {
        Appraisal::pass("")
    }
}

/// Everything one validation run concluded about a device.
#[derive(Clone, Debug, Serialize)]
pub struct SupplyChainValidationSummary {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub device: String,
    pub validations: Vec<SupplyChainValidation>,
    pub overall_result: ValidationResult,
    pub message: String,
}

impl SupplyChainValidationSummary {
    pub fn new(device: impl Into<String>, validations: Vec<SupplyChainValidation>) -> Self {
        let overall = calculate_validation_result(&validations);
        Self {
            id: Uuid::new_v4(),
            created: Utc::now(),
            device: device.into(),
            validations,
            overall_result: overall.result,
            message: overall.message,
        }
    }
}
