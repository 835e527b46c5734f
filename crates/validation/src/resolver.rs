// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Gathers the certificate authorities a credential may chain to.

use std::collections::{BTreeMap, BTreeSet};

use credential::{CaCredential, Common};
use tracing::{debug, error};

use crate::store::{organization_key, CredentialStore, StoreError};

/// An unordered set of trusted certificate authorities.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Keystore {
    certificates: BTreeMap<String, CaCredential>,
}

impl Keystore {
    pub fn insert(&mut self, ca: CaCredential) -> bool {
        self.certificates.insert(ca.common.content_hash.clone(), ca).is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaCredential> {
        self.certificates.values()
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn contains(&self, ca: &CaCredential) -> bool {
        self.certificates.contains_key(&ca.common.content_hash)
    }
}

impl FromIterator<CaCredential> for Keystore {
    fn from_iter<T: IntoIterator<Item = CaCredential>>(iter: T) -> Self {
        let mut out = Self::default();
        for ca in iter {
            out.insert(ca);
        }
        out
    }
}

/// The organisation a credential's issuer is looked up under.
fn issuer_organization(credential: &Common) -> String {
    match credential.issuer.trim() {
        "" => credential.holder_issuer.as_deref().map(organization_key).unwrap_or_default(),
        issuer => organization_key(issuer),
    }
}

pub struct TrustChainResolver<'a, S> {
    store: &'a S,
}

impl<'a, S: CredentialStore> TrustChainResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Every certificate authority reachable from `credential` by key
    /// identifier or issuer organisation.
    ///
    /// This may hold more than one path to a root. `None` means the store
    /// failed and the credential cannot be verified.
    pub fn resolve(&self, credential: &Common) -> Option<Keystore> {
        match self.resolve_from(credential, BTreeSet::new()) {
            Ok(keystore) => Some(keystore),
            Err(e) => {
                error!("Unable to assemble CA keystore: {e}");
                None
            }
        }
    }

    /// Each call records what it queried, either a key identifier or an
    /// organisation, in its own copy of `visited`. A call with nothing new
    /// to query finds nothing, so cycles between organisations end.
    fn resolve_from(&self, credential: &Common, visited: BTreeSet<String>) -> Result<Keystore, StoreError> {
        let mut visited = visited;

        let mut found = Vec::new();
        if let Some(aki) = credential.authority_key_identifier.as_deref().filter(|k| !k.is_empty()) {
            if visited.insert(format!("ski:{aki}")) {
                found.extend(self.store.find_by_subject_key_identifier(aki)?);
            }
        }

        if found.is_empty() {
            let organization = issuer_organization(credential);
            if !visited.insert(format!("org:{organization}")) {
                return Ok(Keystore::default());
            }
            found = self.store.find_by_subject_organization(&organization)?;
            debug!(organization, found = found.len(), "resolved issuers by organization");
        }

        let mut out = Keystore::default();
        for ca in found {
            if !ca.common.is_self_signed() {
                for parent in self.resolve_from(&ca.common, visited.clone())?.certificates.into_values() {
                    out.insert(parent);
                }
            }
            out.insert(ca);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    use credential::fixtures::{KeyPair, PlatformFields};
    use credential::{Credential, PlatformCredential};

    fn ca(pair: &KeyPair) -> CaCredential {
        CaCredential::from_bytes(&pair.cert).unwrap()
    }

    fn stored(cas: &[&CaCredential]) -> MemoryStore {
        let store = MemoryStore::new();
        for ca in cas {
            store.save(Credential::Ca((*ca).clone())).unwrap();
        }
        store
    }

    #[test]
    fn root_resolves_to_itself() {
        let root = ca(&KeyPair::root("CN=Fake Root CA").unwrap());
        let store = stored(&[&root]);

        let keystore = TrustChainResolver::new(&store).resolve(&root.common).unwrap();
        assert_eq!(keystore.len(), 1);
        assert!(keystore.contains(&root));
    }

    #[test]
    fn follows_intermediates_to_root() {
        let root = KeyPair::root("O=Example,CN=Example Root").unwrap();
        let intermediate = root.issue("O=Example Issuing,CN=Example Intermediate", true).unwrap();
        let leaf = intermediate.issue("O=Device,CN=Leaf", false).unwrap();
        let unrelated = ca(&KeyPair::root("O=Unrelated,CN=Unrelated Root").unwrap());

        let (root, intermediate, leaf) = (ca(&root), ca(&intermediate), ca(&leaf));
        let store = stored(&[&root, &intermediate, &unrelated]);

        let keystore = TrustChainResolver::new(&store).resolve(&leaf.common).unwrap();
        assert_eq!(keystore.len(), 2);
        assert!(keystore.contains(&root));
        assert!(keystore.contains(&intermediate));
        assert!(!keystore.contains(&unrelated));
    }

    #[test]
    fn falls_back_to_organization() {
        let root = KeyPair::root("O=Example,CN=Example Root").unwrap();
        let sibling = root.issue("O=Example,CN=Example Sibling", true).unwrap();
        let leaf = root.issue("O=Device,CN=Leaf", false).unwrap();

        // Only the sibling is stored, so the key identifier finds nothing.
        let sibling = ca(&sibling);
        let store = stored(&[&sibling]);

        let keystore = TrustChainResolver::new(&store).resolve(&ca(&leaf).common).unwrap();
        assert_eq!(keystore.iter().collect::<Vec<_>>(), vec![&sibling]);
    }

    #[test]
    fn two_organization_cycle_terminates() {
        let root_a = KeyPair::root("O=A,CN=A Root").unwrap();
        let root_b = KeyPair::root("O=B,CN=B Root").unwrap();

        // A's CA is issued by B and B's CA by A; neither root is stored.
        let a = root_b.issue("O=A,CN=A CA", true).unwrap();
        let b = root_a.issue("O=B,CN=B CA", true).unwrap();
        let leaf = a.issue("O=Device,CN=Leaf", false).unwrap();

        let (a, b) = (ca(&a), ca(&b));
        let store = stored(&[&a, &b]);

        let keystore = TrustChainResolver::new(&store).resolve(&ca(&leaf).common).unwrap();
        assert_eq!(keystore.len(), 2);
        assert!(keystore.contains(&a));
        assert!(keystore.contains(&b));
    }

    #[test]
    fn resolves_platform_credential_issuer() {
        let root = KeyPair::root("O=Example,CN=Platform Root").unwrap();
        let issuing = root.issue("O=Example,CN=Platform Issuing CA", true).unwrap();
        let pc = PlatformCredential::from_bytes(&issuing.platform(&PlatformFields::default()).unwrap()).unwrap();

        let (root, issuing) = (ca(&root), ca(&issuing));
        let store = stored(&[&root, &issuing]);

        let keystore = TrustChainResolver::new(&store).resolve(&pc.common).unwrap();
        assert_eq!(keystore.len(), 2);
    }

    #[test]
    fn nothing_found_is_empty() {
        let root = ca(&KeyPair::root("O=Example,CN=Example Root").unwrap());
        let store = MemoryStore::new();
        let keystore = TrustChainResolver::new(&store).resolve(&root.common).unwrap();
        assert!(keystore.is_empty());
    }

    #[test]
    fn store_failure_degrades_to_none() {
        let root = ca(&KeyPair::root("O=Example,CN=Example Root").unwrap());
        let store = crate::store::tests::FlakyStore::new(u32::MAX);
        assert!(TrustChainResolver::new(&store).resolve(&root.common).is_none());
    }
}
