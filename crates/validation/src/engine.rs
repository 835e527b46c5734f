// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Runs the checks a policy enables against one device's credentials and
//! records the outcome.

use credential::model::type_hash;
use credential::{Credential, CredentialKind, EndorsementCredential, PlatformCredential};
use tracing::{debug, info, info_span, warn};

use crate::config::PolicyConfig;
use crate::device::DeviceInfo;
use crate::resolver::TrustChainResolver;
use crate::store::{CredentialStore, StoreError};
use crate::summary::{
    Appraisal, CredentialRef, SupplyChainValidation, SupplyChainValidationSummary, ValidationResult, ValidationType,
};
use crate::validator::{CredentialValidator, DeltaEntry, DeltaMapping, SupplyChainCredentialValidator, FIRMWARE_VALID};

const MULTIPLE_BASES: &str = "Multiple Base certificates found in chain.";

fn platform_hash(pc: &PlatformCredential) -> String {
    type_hash(&pc.common.content_hash, CredentialKind::Platform)
}

pub struct SupplyChainValidationEngine<'a, S, V = SupplyChainCredentialValidator> {
    store: &'a S,
    validator: V,
    policy: &'a PolicyConfig,
}

impl<'a, S: CredentialStore> SupplyChainValidationEngine<'a, S> {
    pub fn new(store: &'a S, policy: &'a PolicyConfig) -> Self {
        Self::with_validator(store, SupplyChainCredentialValidator, policy)
    }
}

impl<'a, S: CredentialStore, V: CredentialValidator> SupplyChainValidationEngine<'a, S, V> {
    pub fn with_validator(store: &'a S, validator: V, policy: &'a PolicyConfig) -> Self {
        Self {
            store,
            validator,
            policy,
        }
    }

    /// Validates the credentials presented by `device`, then stores them
    /// against the device together with the summary.
    ///
    /// Failed checks are reported in the summary. An error is returned only
    /// when the store could not be used.
    pub fn validate(
        &self,
        ec: Option<&EndorsementCredential>,
        pcs: &[PlatformCredential],
        device: &DeviceInfo,
    ) -> Result<SupplyChainValidationSummary, StoreError> {
        let span = info_span!("validate", device = %device.name);
        let _enter = span.enter();

        let mut validations = Vec::new();

        if self.policy.ec_validation {
            validations.push(self.validate_endorsement(ec, device)?);
        }

        // The store holds the chain as presented before anything looks it up.
        for pc in pcs {
            self.store.update(Credential::from(pc.clone()), &device.name)?;
        }

        let base = pcs.iter().find(|pc| pc.is_base());
        let mut deltas = self.delta_chain(base, pcs)?;

        let mut trust = Vec::new();
        let mut stored_deltas = Vec::new();
        if self.policy.pc_validation {
            if pcs.is_empty() {
                validations.push(SupplyChainValidation::new(
                    ValidationType::PlatformCredential,
                    Appraisal::fail("Platform credential(s) missing"),
                    Vec::new(),
                ));
            }

            for pc in pcs {
                let record = self.validate_platform(pc)?;
                if let Some(entry) = deltas.get_mut(&platform_hash(pc)) {
                    entry.validation = Some(record.clone());
                }
                trust.push(Some(record));
            }

            // Deltas stored by earlier runs are checked against their own chains.
            for entry in deltas.values_mut().filter(|e| e.validation.is_none()) {
                let record = SupplyChainValidation::new(
                    ValidationType::PlatformCredential,
                    self.trust(&entry.credential),
                    vec![(&entry.credential).into()],
                );
                entry.validation = Some(record.clone());
                stored_deltas.push(record);
            }
        } else {
            trust.resize(pcs.len(), None);
        }

        for (pc, trusted) in pcs.iter().zip(trust) {
            let attributes = match self.policy.pc_attribute_validation {
                true => self.validate_attributes(pc, base, &deltas, ec, device),
                false => None,
            };

            match (trusted, attributes) {
                (Some(t), Some(a)) => validations.push(merge(t, a)),
                (Some(record), None) | (None, Some(record)) => validations.push(record),
                (None, None) => (),
            }
        }

        validations.extend(stored_deltas);

        if self.policy.pc_validation && !pcs.is_empty() {
            if let Some(record) = chain_policy(base, &deltas) {
                validations.push(record);
            }
        }

        if self.policy.firmware_validation {
            validations.push(SupplyChainValidation::new(
                ValidationType::Firmware,
                Appraisal::pass(FIRMWARE_VALID),
                Vec::new(),
            ));
        }

        let summary = SupplyChainValidationSummary::new(&device.name, validations);
        info!(result = %summary.overall_result, "supply chain validation complete");

        if let Some(base) = base {
            let mut base = base.clone();
            base.component_failures = summary.message.clone();
            self.store.update(base.into(), &device.name)?;
        }

        self.store.save_summary(&summary)?;
        Ok(summary)
    }

    fn validate_endorsement(
        &self,
        ec: Option<&EndorsementCredential>,
        device: &DeviceInfo,
    ) -> Result<SupplyChainValidation, StoreError> {
        let ec = match ec {
            Some(ec) => ec,
            None => {
                warn!("Endorsement credential is missing");
                return Ok(SupplyChainValidation::new(
                    ValidationType::EndorsementCredential,
                    Appraisal::fail("Endorsement credential is missing"),
                    Vec::new(),
                ));
            }
        };

        let trusted = TrustChainResolver::new(self.store).resolve(&ec.common);
        let appraisal = self
            .validator
            .validate_endorsement(Some(ec), trusted.as_ref(), self.policy.accept_expired);
        debug!(result = %appraisal.result, "{}", appraisal.message);

        self.store.update(ec.clone().into(), &device.name)?;
        Ok(SupplyChainValidation::new(
            ValidationType::EndorsementCredential,
            appraisal,
            vec![ec.into()],
        ))
    }

    fn trust(&self, pc: &PlatformCredential) -> Appraisal {
        let trusted = TrustChainResolver::new(self.store).resolve(&pc.common);
        self.validator
            .validate_platform_trust(pc, trusted.as_ref(), self.policy.accept_expired)
    }

    fn validate_platform(&self, pc: &PlatformCredential) -> Result<SupplyChainValidation, StoreError> {
        let mut appraisal = self.trust(pc);
        debug!(result = %appraisal.result, "{}", appraisal.message);

        if self.has_other_base(pc)? {
            appraisal = match appraisal.result {
                ValidationResult::Pass => Appraisal::fail(MULTIPLE_BASES),
                _ => Appraisal::fail(format!("{},\n{MULTIPLE_BASES}", appraisal.message)),
            };
        }

        Ok(SupplyChainValidation::new(
            ValidationType::PlatformCredential,
            appraisal,
            vec![pc.into()],
        ))
    }

    /// Whether more than one base credential was issued for the platform of `pc`.
    fn has_other_base(&self, pc: &PlatformCredential) -> Result<bool, StoreError> {
        let serial = match pc.platform_serial.as_deref().filter(|s| !s.is_empty()) {
            Some(serial) => serial,
            None => return Ok(false),
        };

        let bases = self
            .store
            .find_by_board_serial(serial)?
            .into_iter()
            .filter(|stored| stored.is_base())
            .count();

        if bases > 1 {
            warn!(serial, bases, "{MULTIPLE_BASES}");
        }
        Ok(bases > 1)
    }

    /// The delta credentials presented with `pcs` and those stored for the
    /// same platform as `base`.
    fn delta_chain(&self, base: Option<&PlatformCredential>, pcs: &[PlatformCredential]) -> Result<DeltaMapping, StoreError> {
        let mut stored = Vec::new();
        if let Some(serial) = base.and_then(|b| b.platform_serial.as_deref()).filter(|s| !s.is_empty()) {
            stored = self.store.find_by_board_serial(serial)?;
        }

        Ok(pcs
            .iter()
            .cloned()
            .chain(stored)
            .filter(PlatformCredential::is_delta)
            .map(|pc| {
                let entry = DeltaEntry {
                    credential: pc,
                    validation: None,
                };
                (platform_hash(&entry.credential), entry)
            })
            .collect())
    }

    fn validate_attributes(
        &self,
        pc: &PlatformCredential,
        base: Option<&PlatformCredential>,
        deltas: &DeltaMapping,
        ec: Option<&EndorsementCredential>,
        device: &DeviceInfo,
    ) -> Option<SupplyChainValidation> {
        let appraisal = if pc.is_delta() {
            match base {
                Some(base) => self
                    .validator
                    .validate_delta_platform_attributes(pc, device, base, deltas),
                None => Appraisal::fail("Base Platform credential missing. Cannot validate attributes"),
            }
        } else if !deltas.is_empty() {
            // The deltas validate the whole chain, base included.
            return None;
        } else {
            self.validator.validate_platform_attributes(pc, Some(device), ec)
        };
        debug!(result = %appraisal.result, "{}", appraisal.message);

        Some(SupplyChainValidation::new(
            ValidationType::PlatformCredentialAttributes,
            appraisal,
            vec![pc.into()],
        ))
    }
}

/// Folds the attribute check of a credential into its trust check.
///
/// A failure of the attributes alone replaces the passing trust record.
/// Anything else is reported once, with the worse result and both messages.
fn merge(trust: SupplyChainValidation, attributes: SupplyChainValidation) -> SupplyChainValidation {
    if trust.result == ValidationResult::Pass && attributes.result != ValidationResult::Pass {
        return SupplyChainValidation {
            validation_type: ValidationType::PlatformCredential,
            ..attributes
        };
    }

    SupplyChainValidation {
        validation_type: ValidationType::PlatformCredential,
        result: trust.result.max(attributes.result),
        credentials: trust.credentials,
        message: format!("{}\n{}", trust.message, attributes.message),
    }
}

/// Checks that a base exists and that no delta predates it.
fn chain_policy(base: Option<&PlatformCredential>, deltas: &DeltaMapping) -> Option<SupplyChainValidation> {
    let base = match base {
        Some(base) => base,
        None => {
            return Some(SupplyChainValidation::new(
                ValidationType::PlatformCredential,
                Appraisal::fail("Base Platform credential missing"),
                deltas.values().map(|e| (&e.credential).into()).collect(),
            ))
        }
    };

    let early: Vec<CredentialRef> = deltas
        .values()
        .filter(|e| e.credential.common.not_before < base.common.not_before)
        .map(|e| (&e.credential).into())
        .collect();

    match early.is_empty() {
        true => None,
        false => Some(SupplyChainValidation::new(
            ValidationType::PlatformCredential,
            Appraisal::fail("Delta Certificate's validity date is not after Base"),
            early,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ComponentInfo, HardwareInfo};
    use crate::store::MemoryStore;
    use crate::validator::{ENDORSEMENT_VALID, PLATFORM_VALID};

    use std::time::{Duration, SystemTime};

    use credential::fixtures::{component, KeyPair, PlatformFields};
    use credential::CaCredential;

    const CPU: [u8; 4] = [0, 3, 0, 3];

    struct Setup {
        store: MemoryStore,
        root: KeyPair,
        ec: EndorsementCredential,
    }

    impl Setup {
        fn new() -> Self {
            let root = KeyPair::root("O=Example,CN=Example Root").unwrap();
            let store = MemoryStore::new();
            store
                .save(CaCredential::from_bytes(&root.cert).unwrap().into())
                .unwrap();

            let ek = root.endorsement("id:54434700", "SLB9670", "id:0007").unwrap();
            let ec = EndorsementCredential::from_bytes(&ek.cert).unwrap();
            Self { store, root, ec }
        }

        fn holder(&self) -> u8 {
            *self.ec.common.serial_number.to_bytes_be().last().unwrap()
        }

        fn platform(&self, fields: PlatformFields<'_>) -> PlatformCredential {
            let fields = PlatformFields {
                holder_serial: self.holder(),
                ..fields
            };
            PlatformCredential::from_bytes(&self.root.platform(&fields).unwrap()).unwrap()
        }

        fn base(&self) -> PlatformCredential {
            self.platform(PlatformFields {
                components: vec![component(&CPU, "Intel", "Xeon", Some("CPU-1"), None)],
                ..Default::default()
            })
        }

        fn delta(&self, window: (SystemTime, SystemTime)) -> PlatformCredential {
            self.platform(PlatformFields {
                base: Some(false),
                window,
                ..Default::default()
            })
        }

        fn validate(
            &self,
            policy: &PolicyConfig,
            pcs: &[PlatformCredential],
            device: &DeviceInfo,
        ) -> SupplyChainValidationSummary {
            SupplyChainValidationEngine::new(&self.store, policy)
                .validate(Some(&self.ec), pcs, device)
                .unwrap()
        }
    }

    fn device() -> DeviceInfo {
        DeviceInfo {
            name: "server-01".into(),
            hardware: HardwareInfo {
                manufacturer: "Example Inc.".into(),
                product_name: "Example Server".into(),
                version: "1.0".into(),
                system_serial_number: "S1".into(),
                baseboard_serial_number: "BOARD-1".into(),
                chassis_serial_number: "".into(),
            },
            components: vec![ComponentInfo {
                component_class: "00030003".into(),
                manufacturer: "Intel".into(),
                model: "Xeon".into(),
                serial: Some("CPU-1".into()),
                revision: None,
            }],
        }
    }

    fn messages(summary: &SupplyChainValidationSummary) -> Vec<(ValidationType, ValidationResult, &str)> {
        summary
            .validations
            .iter()
            .map(|v| (v.validation_type, v.result, v.message.as_str()))
            .collect()
    }

    #[test]
    fn passes_matching_device() {
        let setup = Setup::new();
        let base = setup.base();

        let summary = setup.validate(&PolicyConfig::default(), &[base.clone()], &device());
        assert_eq!(summary.overall_result, ValidationResult::Pass);
        assert_eq!(summary.message, "");
        assert_eq!(
            messages(&summary),
            vec![
                (ValidationType::EndorsementCredential, ValidationResult::Pass, ENDORSEMENT_VALID),
                (
                    ValidationType::PlatformCredential,
                    ValidationResult::Pass,
                    "Platform credential validated\nPlatform credential attributes validated"
                ),
            ]
        );

        let summaries = setup.store.summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, summary.id);

        // Both credentials now belong to the device.
        let stored = setup.store.credentials().unwrap();
        assert_eq!(stored.iter().filter(|s| s.device.as_deref() == Some("server-01")).count(), 2);
    }

    #[test]
    fn missing_endorsement() {
        let setup = Setup::new();
        let policy = PolicyConfig {
            pc_validation: false,
            pc_attribute_validation: false,
            ..Default::default()
        };

        let summary = SupplyChainValidationEngine::new(&setup.store, &policy)
            .validate(None, &[], &device())
            .unwrap();
        assert_eq!(
            messages(&summary),
            vec![(
                ValidationType::EndorsementCredential,
                ValidationResult::Fail,
                "Endorsement credential is missing"
            )]
        );
        assert_eq!(summary.message, "ENDORSEMENT_CREDENTIAL\n");
    }

    #[test]
    fn missing_platform_credentials() {
        let setup = Setup::new();
        let summary = setup.validate(&PolicyConfig::default(), &[], &device());
        assert!(messages(&summary).contains(&(
            ValidationType::PlatformCredential,
            ValidationResult::Fail,
            "Platform credential(s) missing"
        )));
    }

    #[test]
    fn multiple_bases() {
        let setup = Setup::new();
        let policy = PolicyConfig {
            pc_attribute_validation: false,
            ..Default::default()
        };
        let pcs = [setup.base(), setup.base(), setup.delta(credential::fixtures::window())];

        let summary = setup.validate(&policy, &pcs, &device());
        let failed: Vec<_> = summary
            .validations
            .iter()
            .filter(|v| v.validation_type == ValidationType::PlatformCredential)
            .filter(|v| v.message.contains(MULTIPLE_BASES))
            .collect();
        assert_eq!(failed.len(), 3);
        assert!(failed.iter().all(|v| v.result == ValidationResult::Fail));
        assert!(failed.iter().any(|v| v.credentials == [CredentialRef::from(&pcs[2])]));
        assert_eq!(summary.overall_result, ValidationResult::Fail);
    }

    #[test]
    fn attribute_failure_replaces_passing_trust() {
        let setup = Setup::new();
        let mut device = device();
        device.hardware.manufacturer = "Other Inc.".into();

        let summary = setup.validate(&PolicyConfig::default(), &[setup.base()], &device);
        assert_eq!(
            messages(&summary)[1],
            (
                ValidationType::PlatformCredential,
                ValidationResult::Fail,
                "Platform manufacturer did not match\n"
            )
        );
        assert_eq!(summary.message, "PLATFORM_CREDENTIAL\n");

        // The base remembers why the device failed.
        let stored = setup.store.credentials().unwrap();
        let base = stored
            .iter()
            .find_map(|s| match &s.credential {
                Credential::Platform(pc) => Some(pc),
                _ => None,
            })
            .unwrap();
        assert_eq!(base.component_failures, "PLATFORM_CREDENTIAL\n");
    }

    #[test]
    fn trust_and_attribute_failures_combine() {
        let setup = Setup::new();
        let stranger = KeyPair::root("O=Stranger,CN=Stranger Root").unwrap();
        let fields = PlatformFields {
            holder_serial: setup.holder(),
            manufacturer: "Other Inc.",
            components: vec![component(&CPU, "Intel", "Xeon", Some("CPU-1"), None)],
            ..Default::default()
        };
        let pc = PlatformCredential::from_bytes(&stranger.platform(&fields).unwrap()).unwrap();

        let summary = setup.validate(&PolicyConfig::default(), &[pc], &device());
        assert_eq!(
            messages(&summary)[1],
            (
                ValidationType::PlatformCredential,
                ValidationResult::Fail,
                "Can't validate platform credential without an Issuer Cert in the Trust Store\n\n\
                 Platform manufacturer did not match\n"
            )
        );
    }

    #[test]
    fn missing_base() {
        let setup = Setup::new();
        let delta = setup.delta(credential::fixtures::window());

        let summary = setup.validate(&PolicyConfig::default(), &[delta], &device());
        let messages = messages(&summary);
        assert!(messages.contains(&(
            ValidationType::PlatformCredential,
            ValidationResult::Fail,
            "Base Platform credential missing"
        )));
        assert!(messages.contains(&(
            ValidationType::PlatformCredential,
            ValidationResult::Fail,
            "Base Platform credential missing. Cannot validate attributes"
        )));
    }

    #[test]
    fn delta_predating_base() {
        let setup = Setup::new();
        let now = SystemTime::now();
        let hour = Duration::from_secs(3600);
        let delta = setup.delta((now - 2 * hour, now + hour));

        let policy = PolicyConfig {
            pc_attribute_validation: false,
            ..Default::default()
        };
        let summary = setup.validate(&policy, &[setup.base(), delta], &device());
        assert_eq!(
            messages(&summary).last(),
            Some(&(
                ValidationType::PlatformCredential,
                ValidationResult::Fail,
                "Delta Certificate's validity date is not after Base"
            ))
        );
    }

    #[test]
    fn delta_chain_from_store() {
        let setup = Setup::new();
        let base = setup.base();
        let now = SystemTime::now();
        let delta = setup.platform(PlatformFields {
            base: Some(false),
            components: vec![
                component(&CPU, "Intel", "Xeon", Some("CPU-1"), Some(2)),
                component(&CPU, "Intel", "Xeon", Some("CPU-2"), Some(0)),
            ],
            window: (now - Duration::from_secs(60), now + Duration::from_secs(3600)),
            ..Default::default()
        });

        // An earlier run stored the delta.
        setup.store.update(delta.clone().into(), "server-01").unwrap();

        let mut device = device();
        device.components[0].serial = Some("CPU-2".into());

        // Presented alone, the base still defers to the stored chain.
        let summary = setup.validate(&PolicyConfig::default(), &[base.clone()], &device);
        assert_eq!(
            messages(&summary),
            vec![
                (ValidationType::EndorsementCredential, ValidationResult::Pass, ENDORSEMENT_VALID),
                (ValidationType::PlatformCredential, ValidationResult::Pass, PLATFORM_VALID),
                (ValidationType::PlatformCredential, ValidationResult::Pass, PLATFORM_VALID),
            ]
        );
        assert_eq!(summary.validations[2].credentials[0].type_hash, platform_hash(&delta));

        let summary = setup.validate(&PolicyConfig::default(), &[base, delta.clone()], &device);
        assert_eq!(summary.overall_result, ValidationResult::Pass);
        assert_eq!(
            messages(&summary)[2],
            (
                ValidationType::PlatformCredential,
                ValidationResult::Pass,
                "Platform credential validated\nPlatform credential attributes validated"
            )
        );
        assert_eq!(summary.validations[2].credentials[0].type_hash, platform_hash(&delta));
    }

    #[test]
    fn firmware() {
        let setup = Setup::new();
        let policy = PolicyConfig {
            firmware_validation: true,
            ..Default::default()
        };

        let summary = setup.validate(&policy, &[setup.base()], &device());
        assert_eq!(
            messages(&summary).last(),
            Some(&(ValidationType::Firmware, ValidationResult::Pass, FIRMWARE_VALID))
        );
    }
}
