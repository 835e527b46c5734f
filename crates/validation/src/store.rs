// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Where credentials and validation summaries are kept.

use std::sync::{PoisonError, RwLock};
use std::thread;

use credential::name;
use credential::{CaCredential, Credential, PlatformCredential};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::summary::SupplyChainValidationSummary;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The same bytes are already stored in the same role.
    #[error("credential already stored: {0}")]
    Duplicate(String),

    /// A concurrent writer got there first; the access may be retried.
    #[error("store contention: {0}")]
    Contention(String),

    #[error("store failure: {0}")]
    Backend(String),
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(e: PoisonError<T>) -> Self {
        Self::Backend(e.to_string())
    }
}

/// The key CA credentials are grouped under: the organisation of a name,
/// or the whole sorted name when it has none.
pub fn organization_key(dn: &str) -> String {
    name::organization(dn).unwrap_or_else(|| name::sort_dn(Some(dn)))
}

/// Storage the validation engine reads credentials from and records into.
pub trait CredentialStore {
    /// Certificate authorities whose subject falls under `organization`.
    fn find_by_subject_organization(&self, organization: &str) -> Result<Vec<CaCredential>, StoreError>;

    /// The certificate authority with this hex encoded key identifier.
    fn find_by_subject_key_identifier(&self, ski: &str) -> Result<Option<CaCredential>, StoreError>;

    /// Every platform credential for the platform with this serial number.
    fn find_by_board_serial(&self, serial: &str) -> Result<Vec<PlatformCredential>, StoreError>;

    /// Stores a credential, refusing a second copy of it in the same role.
    fn save(&self, credential: Credential) -> Result<(), StoreError>;

    /// Replaces a stored credential and records the device it belongs to.
    fn update(&self, credential: Credential, device: &str) -> Result<(), StoreError>;

    fn save_summary(&self, summary: &SupplyChainValidationSummary) -> Result<(), StoreError>;
}

#[derive(Clone, Debug)]
pub struct StoredCredential {
    pub credential: Credential,
    pub device: Option<String>,
}

/// A store held in memory, safe to share between validation runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    credentials: RwLock<Vec<StoredCredential>>,
    summaries: RwLock<Vec<SupplyChainValidationSummary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(&self) -> Result<Vec<StoredCredential>, StoreError> {
        Ok(self.credentials.read()?.clone())
    }

    pub fn summaries(&self) -> Result<Vec<SupplyChainValidationSummary>, StoreError> {
        Ok(self.summaries.read()?.clone())
    }

    fn cas(&self) -> Result<Vec<CaCredential>, StoreError> {
        Ok(self
            .credentials
            .read()?
            .iter()
            .filter_map(|s| match &s.credential {
                Credential::Ca(ca) => Some(ca.clone()),
                _ => None,
            })
            .collect())
    }
}

impl CredentialStore for MemoryStore {
    fn find_by_subject_organization(&self, organization: &str) -> Result<Vec<CaCredential>, StoreError> {
        Ok(self
            .cas()?
            .into_iter()
            .filter(|ca| ca.common.subject.as_deref().map(organization_key).as_deref() == Some(organization))
            .collect())
    }

    fn find_by_subject_key_identifier(&self, ski: &str) -> Result<Option<CaCredential>, StoreError> {
        Ok(self
            .cas()?
            .into_iter()
            .find(|ca| ca.subject_key_identifier.as_deref() == Some(ski)))
    }

    fn find_by_board_serial(&self, serial: &str) -> Result<Vec<PlatformCredential>, StoreError> {
        Ok(self
            .credentials
            .read()?
            .iter()
            .filter_map(|s| match &s.credential {
                Credential::Platform(pc) if pc.platform_serial.as_deref() == Some(serial) => Some(pc.clone()),
                _ => None,
            })
            .collect())
    }

    fn save(&self, credential: Credential) -> Result<(), StoreError> {
        let hash = credential.type_hash();
        let mut credentials = self.credentials.write()?;
        if credentials.iter().any(|s| s.credential.type_hash() == hash) {
            return Err(StoreError::Duplicate(hash));
        }

        debug!(kind = %credential.kind(), "storing credential {hash}");
        credentials.push(StoredCredential {
            credential,
            device: None,
        });
        Ok(())
    }

    fn update(&self, credential: Credential, device: &str) -> Result<(), StoreError> {
        let hash = credential.type_hash();
        let mut credentials = self.credentials.write()?;
        let stored = StoredCredential {
            credential,
            device: Some(device.into()),
        };

        match credentials.iter_mut().find(|s| s.credential.type_hash() == hash) {
            Some(slot) => *slot = stored,
            None => credentials.push(stored),
        }
        Ok(())
    }

    fn save_summary(&self, summary: &SupplyChainValidationSummary) -> Result<(), StoreError> {
        self.summaries.write()?.push(summary.clone());
        Ok(())
    }
}

/// Retries accesses that failed on contention, backing off between tries.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    config: StoreConfig,
}

impl<S: CredentialStore> RetryingStore<S> {
    pub fn new(inner: S, config: StoreConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn retry<T>(&self, what: &str, f: impl Fn(&S) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match f(&self.inner) {
                Err(StoreError::Contention(e)) if attempt < self.config.retries => {
                    let delay = self.config.backoff(attempt);
                    warn!(attempt, ?delay, "{what} hit contention, retrying: {e}");
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl<S: CredentialStore> CredentialStore for RetryingStore<S> {
    fn find_by_subject_organization(&self, organization: &str) -> Result<Vec<CaCredential>, StoreError> {
        self.retry("find_by_subject_organization", |s| s.find_by_subject_organization(organization))
    }

    fn find_by_subject_key_identifier(&self, ski: &str) -> Result<Option<CaCredential>, StoreError> {
        self.retry("find_by_subject_key_identifier", |s| s.find_by_subject_key_identifier(ski))
    }

    fn find_by_board_serial(&self, serial: &str) -> Result<Vec<PlatformCredential>, StoreError> {
        self.retry("find_by_board_serial", |s| s.find_by_board_serial(serial))
    }

    fn save(&self, credential: Credential) -> Result<(), StoreError> {
        self.retry("save", |s| s.save(credential.clone()))
    }

    fn update(&self, credential: Credential, device: &str) -> Result<(), StoreError> {
        self.retry("update", |s| s.update(credential.clone(), device))
    }

    fn save_summary(&self, summary: &SupplyChainValidationSummary) -> Result<(), StoreError> {
        self.retry("save_summary", |s| s.save_summary(summary))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use credential::fixtures::{KeyPair, PlatformFields};
    use credential::CredentialKind;

    /// Fails the first `failures` accesses with contention, then delegates.
    pub(crate) struct FlakyStore {
        pub(crate) inner: MemoryStore,
        pub(crate) failures: AtomicU32,
        pub(crate) calls: AtomicU32,
    }

    impl FlakyStore {
        pub(crate) fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }

        fn gate(&self) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Contention("busy".into()));
            }
            Ok(())
        }
    }

    impl CredentialStore for FlakyStore {
        fn find_by_subject_organization(&self, organization: &str) -> Result<Vec<CaCredential>, StoreError> {
            self.gate()?;
            self.inner.find_by_subject_organization(organization)
        }

        fn find_by_subject_key_identifier(&self, ski: &str) -> Result<Option<CaCredential>, StoreError> {
            self.gate()?;
            self.inner.find_by_subject_key_identifier(ski)
        }

        fn find_by_board_serial(&self, serial: &str) -> Result<Vec<PlatformCredential>, StoreError> {
            self.gate()?;
            self.inner.find_by_board_serial(serial)
        }

        fn save(&self, credential: Credential) -> Result<(), StoreError> {
            self.gate()?;
            self.inner.save(credential)
        }

        fn update(&self, credential: Credential, device: &str) -> Result<(), StoreError> {
            self.gate()?;
            self.inner.update(credential, device)
        }

        fn save_summary(&self, summary: &SupplyChainValidationSummary) -> Result<(), StoreError> {
            self.gate()?;
            self.inner.save_summary(summary)
        }
    }

    fn quick(retries: u32) -> StoreConfig {
        StoreConfig { retries, backoff_ms: 1 }
    }

    #[test]
    fn rejects_duplicate_in_same_role() {
        let root = KeyPair::root("O=Example,CN=Example Root").unwrap();
        let store = MemoryStore::new();

        store.save(Credential::from_bytes(&root.cert).unwrap()).unwrap();
        let err = store.save(Credential::from_bytes(&root.cert).unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(..)));

        // The same bytes in another role are a different credential.
        let as_ec = Credential::from_bytes_as(CredentialKind::Endorsement, &root.cert).unwrap();
        store.save(as_ec).unwrap();
        assert_eq!(store.credentials().unwrap().len(), 2);
    }

    #[test]
    fn finds_by_organization_and_key_identifier() {
        let root = KeyPair::root("O=Example,CN=Example Root").unwrap();
        let other = KeyPair::root("CN=Unorganised Root").unwrap();
        let store = MemoryStore::new();

        let root = CaCredential::from_bytes(&root.cert).unwrap();
        let other = CaCredential::from_bytes(&other.cert).unwrap();
        store.save(root.clone().into()).unwrap();
        store.save(other.clone().into()).unwrap();

        assert_eq!(store.find_by_subject_organization("Example").unwrap(), vec![root.clone()]);
        assert!(store.find_by_subject_organization("Nobody").unwrap().is_empty());

        let key = organization_key(other.common.subject.as_deref().unwrap());
        assert_eq!(store.find_by_subject_organization(&key).unwrap(), vec![other]);

        let ski = root.subject_key_identifier.clone().unwrap();
        assert_eq!(store.find_by_subject_key_identifier(&ski).unwrap(), Some(root));
        assert_eq!(store.find_by_subject_key_identifier("00").unwrap(), None);
    }

    #[test]
    fn finds_by_board_serial() {
        let root = KeyPair::root("CN=Platform CA").unwrap();
        let store = MemoryStore::new();
        for serial in ["S1", "S1", "S2"] {
            let der = root
                .platform(&PlatformFields {
                    serial,
                    ..Default::default()
                })
                .unwrap();
            store.save(Credential::from_bytes(&der).unwrap()).unwrap();
        }

        assert_eq!(store.find_by_board_serial("S1").unwrap().len(), 2);
        assert_eq!(store.find_by_board_serial("S2").unwrap().len(), 1);
        assert!(store.find_by_board_serial("S3").unwrap().is_empty());
    }

    #[test]
    fn update_records_device() {
        let root = KeyPair::root("CN=Example Root").unwrap();
        let cred = Credential::from_bytes(&root.cert).unwrap();
        let store = MemoryStore::new();

        store.save(cred.clone()).unwrap();
        store.update(cred.clone(), "device-1").unwrap();

        let stored = store.credentials().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].device.as_deref(), Some("device-1"));
        assert_eq!(stored[0].credential, cred);
    }

    #[test]
    fn organization_keys() {
        assert_eq!(organization_key("CN=Root,O=Example"), "Example");
        assert_eq!(organization_key("CN=Root"), "cn=root");
        assert_eq!(organization_key(""), name::BLANK);
    }

    #[test]
    fn retries_contention() {
        let store = RetryingStore::new(FlakyStore::new(2), quick(3));
        assert!(store.find_by_board_serial("S1").unwrap().is_empty());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_retries() {
        let store = RetryingStore::new(FlakyStore::new(10), quick(2));
        let err = store.find_by_board_serial("S1").unwrap_err();
        assert!(matches!(err, StoreError::Contention(..)));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn duplicates_are_not_retried() {
        let root = KeyPair::root("CN=Example Root").unwrap();
        let cred = Credential::from_bytes(&root.cert).unwrap();
        let store = RetryingStore::new(FlakyStore::new(0), quick(3));

        store.save(cred.clone()).unwrap();
        assert!(matches!(store.save(cred), Err(StoreError::Duplicate(..))));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 2);
    }
}
