// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Decoders for the TCG structures carried inside credential attributes
//! and extensions.
//!
//! Mandatory leading fields are read by position. Trailing fields are
//! context tagged and dispatched by tag number; a tag outside a closed set
//! is an error. Optional untagged fields are recognised by the type of the
//! element in their position.

mod address;
mod class;
mod common_criteria;
mod component;
mod configuration;
mod fips;
mod property;
mod tbb;
mod tpm;
mod uri;

pub use self::address::{AddressType, ComponentAddress};
pub use self::class::{ClassName, ComponentClass, Registry};
pub use self::common_criteria::{
    CommonCriteriaMeasures, EvaluationAssuranceLevel, EvaluationStatus, StrengthOfFunction,
};
pub use self::component::{CertificateIdentifier, ComponentIdentifier, CONFIGMAX};
pub use self::configuration::PlatformConfiguration;
pub use self::fips::{FipsLevel, SecurityLevel};
pub use self::property::PlatformProperty;
pub use self::tbb::{MeasurementRootType, TbbSecurityAssertion};
pub use self::tpm::{EkCertGenerationLocation, EkGenerationLocation, EkGenerationType};
pub use self::tpm::{TpmSecurityAssertions, TpmSpecification};
pub use self::uri::UriReference;

use serde::Serialize;

use crate::error::DecodeError;

pub const NOT_SPECIFIED: &str = "Not Specified";

/// Change recorded against a component or property by a delta credential.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AttributeStatus {
    #[serde(rename = "added")]
    Added,
    #[serde(rename = "modified")]
    Modified,
    #[serde(rename = "removed")]
    Removed,
    #[serde(rename = "")]
    NotSpecified,
}

impl AttributeStatus {
    const ALL: [Self; 4] = [Self::Added, Self::Modified, Self::Removed, Self::NotSpecified];

    pub fn from_value(value: i64) -> Result<Self, DecodeError> {
        pick(&Self::ALL, value, "attribute status")
    }
}

/// Maps a zero based ENUMERATED value onto a closed set of variants.
pub(crate) fn pick<T: Copy>(values: &[T], index: i64, what: &str) -> Result<T, DecodeError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| values.get(i).copied())
        .ok_or_else(|| DecodeError::InvalidEnumValue(format!("Invalid {what}: {index}.")))
}
