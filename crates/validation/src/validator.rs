// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Per-credential checks: signature chains, validity and the comparison
//! of platform credentials with the device inventory.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use credential::attributes::ComponentIdentifier;
use credential::{Common, EndorsementCredential, PlatformCredential, VerificationFailure};
use sha1::{Digest, Sha1};
use tracing::{debug, error, info, warn};

use crate::device::{is_specified, ComponentInfo, DeviceInfo};
use crate::resolver::Keystore;
use crate::summary::{Appraisal, SupplyChainValidation};

pub const ENDORSEMENT_VALID: &str = "Endorsement credential validated";
pub const PLATFORM_VALID: &str = "Platform credential validated";
pub const PLATFORM_ATTRIBUTES_VALID: &str = "Platform credential attributes validated";
pub const FIRMWARE_VALID: &str = "Firmware validated";

const INTERMEDIATE_FOUND: &str = "Intermediate signing cert found, check for CA cert";
const ISSUER_MISMATCH: &str = "Issuer DN does not match Subject DN";

/// Serial numbers that say nothing about the component.
const NO_SERIAL: [&str; 3] = ["", "Not Specified", "To Be Filled By O.E.M."];

/// A delta credential in the chain of a base, with the result of its
/// trust check when one was made.
#[derive(Clone, Debug)]
pub struct DeltaEntry {
    pub credential: PlatformCredential,
    pub validation: Option<SupplyChainValidation>,
}

/// Delta credentials keyed by their type hash.
pub type DeltaMapping = BTreeMap<String, DeltaEntry>;

/// The checks the validation engine delegates per credential.
pub trait CredentialValidator {
    fn validate_endorsement(
        &self,
        ec: Option<&EndorsementCredential>,
        trusted: Option<&Keystore>,
        accept_expired: bool,
    ) -> Appraisal;

    fn validate_platform_trust(
        &self,
        pc: &PlatformCredential,
        trusted: Option<&Keystore>,
        accept_expired: bool,
    ) -> Appraisal;

    fn validate_platform_attributes(
        &self,
        pc: &PlatformCredential,
        device: Option<&DeviceInfo>,
        ec: Option<&EndorsementCredential>,
    ) -> Appraisal;

    fn validate_delta_platform_attributes(
        &self,
        delta: &PlatformCredential,
        device: &DeviceInfo,
        base: &PlatformCredential,
        deltas: &DeltaMapping,
    ) -> Appraisal;
}

/// Follows issuers through an unordered set of trusted certificates until
/// a self-signed one verifies the chain.
///
/// Each step looks for a certificate whose subject names the current
/// issuer and whose key verifies the current signature. The walk gives up
/// after as many steps as there are certificates. Only the last failure
/// seen is reported.
pub fn validate_cert_chain(cert: &Common, trusted: &Keystore) -> Result<(), VerificationFailure> {
    let mut current = cert;
    let mut failure = String::new();
    let mut via_intermediate = false;

    for _ in 0..=trusted.len() {
        let mut next = None;

        for ca in trusted.iter() {
            let names_match = ca.common.subject_sorted.as_deref() == Some(current.issuer_sorted.as_str());
            let signed = current.is_issuer(&ca.common);

            match (names_match, signed) {
                (true, Ok(())) if ca.common.is_self_signed() => {
                    info!("CA Root found.");
                    return Ok(());
                }
                (true, Ok(())) => {
                    next = Some(&ca.common);
                    break;
                }
                (names_match, signed) => {
                    if !names_match {
                        failure = ISSUER_MISMATCH.into();
                    }
                    if let Err(e) = signed {
                        failure = e.0;
                    }
                }
            }
        }

        match next {
            Some(ca) => {
                debug!(issuer = %current.issuer, "{INTERMEDIATE_FOUND}");
                via_intermediate = true;
                current = ca;
            }
            None => break,
        }
    }

    // Failures past an intermediate only say that no root was reached.
    if via_intermediate {
        failure = INTERMEDIATE_FOUND.into();
    }

    error!("{failure}");
    Err(VerificationFailure(failure))
}

fn serial(ci: &ComponentIdentifier) -> Option<&str> {
    ci.serial.as_deref().filter(|s| !NO_SERIAL.contains(s))
}

/// An empty or absent value in the credential matches anything.
fn field_matches(credential: Option<&str>, device: Option<&str>) -> bool {
    match credential {
        None | Some("") => true,
        Some(value) => Some(value) == device,
    }
}

/// Whether a device component is the one a credential describes.
fn is_match(ci: &ComponentIdentifier, info: &ComponentInfo) -> bool {
    field_matches(Some(&ci.manufacturer), Some(&info.manufacturer))
        && field_matches(Some(&ci.model), Some(&info.model))
        && field_matches(ci.serial.as_deref(), info.serial.as_deref())
        && field_matches(ci.revision.as_deref(), info.revision.as_deref())
}

fn same_class(a: &ComponentIdentifier, b: &ComponentIdentifier) -> bool {
    match (&a.component_class, &b.component_class) {
        (Some(a), Some(b)) => a.value == b.value,
        _ => false,
    }
}

/// Same class, and same manufacturer and model where the first names them.
fn same_part(a: &ComponentIdentifier, b: &ComponentIdentifier) -> bool {
    same_class(a, b)
        && field_matches(Some(&a.manufacturer), Some(&b.manufacturer))
        && field_matches(Some(&a.model), Some(&b.model))
}

fn describe(components: &[&ComponentIdentifier]) -> String {
    components
        .iter()
        .map(|ci| {
            format!(
                "Manufacturer={}, Model={}, Serial={}, Revision={};\n",
                ci.manufacturer,
                ci.model,
                ci.serial.as_deref().unwrap_or_default(),
                ci.revision.as_deref().unwrap_or_default(),
            )
        })
        .collect()
}

/// Pairs credential components with device components one to one.
///
/// Within each manufacturer, components naming a serial number are paired
/// first, then those naming a revision, then the rest.
fn unmatched_components<'c>(components: &[&'c ComponentIdentifier], device: &[ComponentInfo]) -> Vec<&'c ComponentIdentifier> {
    let mut manufacturers: Vec<&str> = Vec::new();
    for ci in components {
        if !manufacturers.contains(&ci.manufacturer.as_str()) {
            manufacturers.push(&ci.manufacturer);
        }
    }

    let mut unmatched = Vec::new();
    for manufacturer in manufacturers {
        let mut pending: Vec<&ComponentIdentifier> = components
            .iter()
            .copied()
            .filter(|ci| ci.manufacturer == manufacturer)
            .collect();
        let mut infos: Vec<&ComponentInfo> = device.iter().filter(|i| i.manufacturer == manufacturer).collect();

        pair_off(&mut pending, &mut infos, |ci, info| match ci.serial.as_deref() {
            Some(s) if !s.is_empty() => info.serial.as_deref() == Some(s),
            _ => false,
        });
        pair_off(&mut pending, &mut infos, |ci, info| match ci.revision.as_deref() {
            Some(r) if !r.is_empty() => info.revision.as_deref() == Some(r),
            _ => false,
        });
        pair_off(&mut pending, &mut infos, is_match);

        unmatched.extend(pending);
    }

    for (i, ci) in unmatched.iter().enumerate() {
        error!("Unmatched component {}: {} {}", i + 1, ci.manufacturer, ci.model);
    }
    unmatched
}

/// Removes each pending component whose first `select`ed device component
/// also matches it, together with that device component.
fn pair_off(
    pending: &mut Vec<&ComponentIdentifier>,
    infos: &mut Vec<&ComponentInfo>,
    select: impl Fn(&ComponentIdentifier, &ComponentInfo) -> bool,
) {
    pending.retain(|ci| match infos.iter().position(|info| select(*ci, *info)) {
        Some(pos) if is_match(*ci, infos[pos]) => {
            infos.remove(pos);
            false
        }
        _ => true,
    });
}

/// A component list after a delta chain has been applied.
#[derive(Default)]
struct Reconciled {
    by_serial: BTreeMap<String, ComponentIdentifier>,
    without_serial: Vec<ComponentIdentifier>,
    failures: String,
}

impl Reconciled {
    fn new(base: &PlatformCredential) -> Self {
        let mut out = Self::default();
        for ci in base.components().iter().filter(|ci| !ci.manufacturer.is_empty() && !ci.model.is_empty()) {
            match serial(ci) {
                Some(s) => {
                    out.by_serial.insert(s.to_string(), ci.clone());
                }
                None => out.without_serial.push(ci.clone()),
            }
        }
        out
    }

    /// Applies the changes of one delta, returning what it got wrong.
    fn apply(&mut self, delta: &PlatformCredential, leftovers: &mut Vec<ComponentIdentifier>) -> String {
        let mut failures = String::new();

        for ci in delta.components() {
            match serial(ci) {
                Some(_) if !ci.is_version2() => (),
                Some(s) if ci.is_modified() => match self.by_serial.get_mut(s) {
                    Some(slot) => *slot = ci.clone(),
                    None => failures.push_str(&format!("{s} attempted MODIFIED with no prior instance.\n")),
                },
                Some(s) if ci.is_removed() => {
                    if self.by_serial.remove(s).is_none() {
                        failures.push_str(&format!("{s} attempted REMOVED with no prior instance.\n"));
                    }
                }
                Some(s) if ci.is_added() => {
                    if self.by_serial.contains_key(s) {
                        failures.push_str(&format!("{s} was ADDED, the serial already exists.\n"));
                    } else {
                        self.by_serial.insert(s.to_string(), ci.clone());
                    }
                }
                Some(_) => (),
                None if ci.is_version2() && ci.is_modified() => {
                    // Only an unambiguous match can be modified in place.
                    let candidates: Vec<usize> = self
                        .without_serial
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| same_part(c, ci))
                        .map(|(i, _)| i)
                        .collect();
                    match candidates[..] {
                        [only] => self.without_serial[only] = ci.clone(),
                        _ => leftovers.push(ci.clone()),
                    }
                }
                None => leftovers.push(ci.clone()),
            }
        }

        failures
    }

    /// Applies changes to components without a serial number, matched by
    /// class, manufacturer and model.
    fn apply_leftovers(&mut self, leftovers: Vec<ComponentIdentifier>) {
        for ci in leftovers.into_iter().filter(ComponentIdentifier::is_version2) {
            let found = self.without_serial.iter().position(|c| same_part(c, &ci));
            match found {
                Some(_) if ci.is_added() || ci.is_modified() => self.without_serial.push(ci),
                Some(pos) if ci.is_removed() => {
                    self.without_serial.remove(pos);
                }
                Some(_) => (),
                None if ci.is_added() => self.without_serial.push(ci),
                None if ci.is_modified() => self.failures.push_str("MODIFIED attempted without prior instance\n"),
                None if ci.is_removed() => self.failures.push_str("REMOVED attempted without prior instance\n"),
                None => (),
            }
        }
    }

    fn components(&self) -> Vec<&ComponentIdentifier> {
        self.by_serial.values().chain(self.without_serial.iter()).collect()
    }
}

/// The validator used unless another is supplied.
#[derive(Copy, Clone, Debug, Default)]
pub struct SupplyChainCredentialValidator;

impl SupplyChainCredentialValidator {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn validate_v1_2(&self, pc: &PlatformCredential, device: &DeviceInfo) -> Appraisal {
        let hardware = &device.hardware;
        let serials = hardware.serial_numbers();

        let board = pc.platform_serial.as_deref().filter(|s| !s.is_empty());
        let chassis = pc.chassis_serial_number.as_deref().filter(|s| !s.is_empty());

        if board.is_some() || chassis.is_some() {
            let found = [board, chassis].into_iter().flatten().any(|serial| {
                match serials.iter().find(|(_, s)| s.eq_ignore_ascii_case(serial)) {
                    Some((label, _)) => {
                        info!("Device info contained platform serial number {serial} in the {label}");
                        true
                    }
                    None => false,
                }
            });

            return if found {
                Appraisal::pass(PLATFORM_ATTRIBUTES_VALID)
            } else {
                error!("The platform credential's board and chassis serial numbers did not match any device serial number");
                Appraisal::fail("Platform serial did not match device info")
            };
        }

        debug!("Credential Serial Number was null");
        if !is_specified(&hardware.baseboard_serial_number) {
            let message = "Device Serial Number was null";
            error!("{message}");
            return Appraisal::fail(message);
        }

        let serial = pc.common.serial_number.to_bytes_be();
        if hash_matches(&serial, &hardware.baseboard_serial_number) {
            Appraisal::pass(PLATFORM_ATTRIBUTES_VALID)
        } else {
            let message = format!(
                "The SHA1 hash of the Device Baseboard Serial Number {} did not match the Certificate's Serial Number",
                hardware.baseboard_serial_number
            );
            error!("{message}");
            Appraisal::fail(message)
        }
    }

    fn validate_v2_0(&self, pc: &PlatformCredential, device: &DeviceInfo) -> Appraisal {
        let hardware = &device.hardware;
        let mut message = String::new();

        if !required_matches(pc.manufacturer.as_deref(), &hardware.manufacturer) {
            message.push_str("Platform manufacturer did not match\n");
        }

        if !required_matches(pc.model.as_deref(), &hardware.product_name) {
            message.push_str("Platform model did not match\n");
        }

        let version = pc.version.as_deref().unwrap_or_default();
        if is_specified(version) && is_specified(&hardware.version) && !required_matches(Some(version), &hardware.version) {
            message.push_str("Platform version did not match\n");
        }

        let serial = pc.platform_serial.as_deref();
        if !optional_matches(serial, &hardware.system_serial_number)
            && !optional_matches(serial, &hardware.baseboard_serial_number)
        {
            message.push_str("Platform serial did not match\n");
        }

        for ci in pc.components() {
            if ci.manufacturer.trim().is_empty() {
                error!("Required field was empty in Platform Credential: componentManufacturer");
                message.push_str("Component manufacturer is empty\n");
            }
            if ci.model.trim().is_empty() {
                error!("Required field was empty in Platform Credential: componentModel");
                message.push_str("Component model is empty\n");
            }
        }

        let valid: Vec<&ComponentIdentifier> = pc
            .components()
            .iter()
            .filter(|ci| !ci.manufacturer.is_empty() && !ci.model.is_empty())
            .collect();
        let unmatched = unmatched_components(&valid, &device.components);
        if !unmatched.is_empty() {
            message.push_str("There are unmatched components:\n");
            message.push_str(&describe(&unmatched));
        }

        if message.is_empty() {
            Appraisal::pass(PLATFORM_ATTRIBUTES_VALID)
        } else {
            Appraisal::fail(message)
        }
    }
}

fn required_matches(credential: Option<&str>, device: &str) -> bool {
    match credential.map(str::trim) {
        Some(value) if !value.is_empty() => value == device.trim(),
        _ => false,
    }
}

fn optional_matches(credential: Option<&str>, device: &str) -> bool {
    credential.map_or(true, |value| value.trim() == device.trim())
}

fn strip_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Whether a certificate serial number is the SHA-1 of a baseboard serial
/// number, allowing for vendors that clear the top bit.
fn hash_matches(certificate_serial: &[u8], baseboard: &str) -> bool {
    let mut digest = Sha1::digest(baseboard.as_bytes());
    let serial = strip_zeros(certificate_serial);

    if serial == strip_zeros(&digest) {
        info!("Device Baseboard Serial Number matches the Certificate Serial Number");
        return true;
    }

    digest[0] &= 0x7f;
    if serial == strip_zeros(&digest) {
        info!("The Certificate serial number had the most significant bit truncated. 159 bits of it matched the device baseboard serial number.");
        return true;
    }

    false
}

impl CredentialValidator for SupplyChainCredentialValidator {
    fn validate_endorsement(
        &self,
        ec: Option<&EndorsementCredential>,
        trusted: Option<&Keystore>,
        accept_expired: bool,
    ) -> Appraisal {
        const BASE: &str = "Can't validate endorsement credential attributes without ";

        let ec = match ec {
            Some(ec) => ec,
            None => return Appraisal::fail(format!("{BASE}an endorsement credential")),
        };
        let trusted = match trusted {
            Some(t) => t,
            None => return Appraisal::error(format!("{BASE}a trust store")),
        };
        if trusted.is_empty() {
            return Appraisal::fail(format!("{BASE}keys in the trust store"));
        }

        if !accept_expired {
            let now = self.now();
            if now > ec.common.not_after {
                warn!("The endorsement credential is expired");
                return Appraisal::fail("The endorsement credential is expired");
            }
            if now < ec.common.not_before {
                warn!("The endorsement credential is not yet valid");
                return Appraisal::fail("The endorsement credential is not yet valid");
            }
        }

        match validate_cert_chain(&ec.common, trusted) {
            Ok(()) => Appraisal::pass(ENDORSEMENT_VALID),
            Err(e) => {
                debug!("endorsement chain: {e}");
                Appraisal::fail("Endorsement credential does not have a valid signature chain in the trust store")
            }
        }
    }

    fn validate_platform_trust(
        &self,
        pc: &PlatformCredential,
        trusted: Option<&Keystore>,
        accept_expired: bool,
    ) -> Appraisal {
        const BASE: &str = "Can't validate platform credential without ";

        let trusted = match trusted {
            Some(t) => t,
            None => return Appraisal::error(format!("{BASE}an initialized trust store")),
        };
        if trusted.is_empty() {
            let message = format!("{BASE}an Issuer Cert in the Trust Store\n");
            error!("{message}");
            return Appraisal::fail(message);
        }

        if !accept_expired && !pc.common.is_valid_on(self.now()) {
            warn!("Platform credential has expired");
            return Appraisal::fail("Platform credential has expired");
        }

        match validate_cert_chain(&pc.common, trusted) {
            Ok(()) => {
                info!("{PLATFORM_VALID}");
                Appraisal::pass(PLATFORM_VALID)
            }
            Err(e) => Appraisal::fail(format!("Platform credential failed verification\n{e}")),
        }
    }

    fn validate_platform_attributes(
        &self,
        pc: &PlatformCredential,
        device: Option<&DeviceInfo>,
        ec: Option<&EndorsementCredential>,
    ) -> Appraisal {
        const BASE: &str = "Can't validate platform credential attributes without ";

        let device = match device {
            Some(d) => d,
            None => return Appraisal::fail(format!("{BASE}a device info report")),
        };
        let ec = match ec {
            Some(ec) => ec,
            None => return Appraisal::fail(format!("{BASE}an endorsement credential")),
        };

        if ec.common.serial_number != pc.common.holder_serial_number {
            let message = "Platform Credential holder serial number does not match the Endorsement Credential's serial number";
            error!("{message}");
            return Appraisal::fail(message);
        }

        if pc.is_version2() {
            self.validate_v2_0(pc, device)
        } else {
            self.validate_v1_2(pc, device)
        }
    }

    fn validate_delta_platform_attributes(
        &self,
        delta: &PlatformCredential,
        device: &DeviceInfo,
        base: &PlatformCredential,
        deltas: &DeltaMapping,
    ) -> Appraisal {
        let mut chain: Vec<(&PlatformCredential, Option<&SupplyChainValidation>)> = deltas
            .values()
            .map(|e| (&e.credential, e.validation.as_ref()))
            .collect();
        if !chain.iter().any(|(pc, _)| *pc == delta) {
            chain.push((delta, None));
        }

        for (pc, _) in &chain {
            if base.platform_serial != pc.platform_serial {
                let message = format!(
                    "Base and Delta platform serial numbers do not match ({} != {})",
                    pc.platform_serial.as_deref().unwrap_or_default(),
                    base.platform_serial.as_deref().unwrap_or_default(),
                );
                error!("{message}");
                return Appraisal::fail(message);
            }

            if !pc.is_base() && base.common.serial_number == pc.common.serial_number {
                let message = format!("Delta Certificate with same serial number as base. ({})", pc.common.serial_number);
                error!("{message}");
                return Appraisal::fail(message);
            }
        }

        chain.sort_by_key(|(pc, _)| pc.common.not_before);

        let mut reconciled = Reconciled::new(base);
        let mut leftovers = Vec::new();
        for (pc, validation) in &chain {
            let failures = reconciled.apply(pc, &mut leftovers);
            if !failures.is_empty() {
                reconciled.failures.push_str(&failures);
                if let Some(v) = validation.filter(|v| !v.appraisal().is_pass()) {
                    reconciled.failures.push_str(&v.message);
                }
            }
        }
        reconciled.apply_leftovers(leftovers);

        if !reconciled.failures.is_empty() {
            return Appraisal::fail(format!(
                "There are errors with Delta Component Statuses:\n{}",
                reconciled.failures
            ));
        }

        // Every component left in the chain must still be on the device.
        let mut infos: Vec<&ComponentInfo> = device.components.iter().collect();
        let mut unmatched = Vec::new();
        for ci in reconciled.components() {
            let class = ci.component_class.as_ref().map(|c| c.value.as_str());
            let found = infos
                .iter()
                .position(|info| class.map_or(false, |c| info.component_class.contains(c)) && is_match(ci, info));
            match found {
                Some(pos) => {
                    infos.remove(pos);
                }
                None => unmatched.push(ci),
            }
        }

        if unmatched.is_empty() {
            Appraisal::pass(PLATFORM_ATTRIBUTES_VALID)
        } else {
            Appraisal::fail(format!("There are unmatched components:\n{}", describe(&unmatched)))
        }
    }
}
