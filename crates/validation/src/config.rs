// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn enabled() -> bool {
    true
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    50
}

fn default_reissue_threshold_days() -> u32 {
    365
}

fn default_validity_days() -> u32 {
    3652
}

/// Which checks a validation run performs.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Validate the endorsement credential against its CA chain.
    #[serde(default = "enabled")]
    pub ec_validation: bool,

    /// Validate the platform credentials against their CA chains.
    #[serde(default = "enabled")]
    pub pc_validation: bool,

    /// Compare the platform credentials with the device inventory.
    #[serde(default = "enabled")]
    pub pc_attribute_validation: bool,

    #[serde(default)]
    pub firmware_validation: bool,

    /// Accept credentials outside their validity window.
    #[serde(default)]
    pub accept_expired: bool,

    /// Days before expiry at which attestation certificates are reissued.
    #[serde(default = "default_reissue_threshold_days")]
    pub reissue_threshold_days: u32,

    /// Validity of issued attestation certificates.
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,

    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            ec_validation: true,
            pc_validation: true,
            pc_attribute_validation: true,
            firmware_validation: false,
            accept_expired: false,
            reissue_threshold_days: default_reissue_threshold_days(),
            validity_days: default_validity_days(),
            store: StoreConfig::default(),
        }
    }
}

/// Retry behaviour for contended store access.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl StoreConfig {
    /// Delay before retry `attempt`, doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config: PolicyConfig = toml::from_str("").unwrap();
        assert_eq!(config, PolicyConfig::default());
        assert!(config.ec_validation);
        assert!(config.pc_validation);
        assert!(config.pc_attribute_validation);
        assert!(!config.firmware_validation);
        assert!(!config.accept_expired);
        assert_eq!(config.store.retries, 3);
        assert_eq!(config.store.backoff_ms, 50);
    }

    #[test]
    fn test_full_config() {
        let raw = r#"
        ec_validation = false
        pc_validation = true
        pc_attribute_validation = false
        firmware_validation = true
        accept_expired = true
        reissue_threshold_days = 30
        validity_days = 90

        [store]
        retries = 5
        backoff_ms = 10
        "#;

        let config: PolicyConfig = toml::from_str(raw).unwrap();
        assert!(!config.ec_validation);
        assert!(config.pc_validation);
        assert!(!config.pc_attribute_validation);
        assert!(config.firmware_validation);
        assert!(config.accept_expired);
        assert_eq!(config.reissue_threshold_days, 30);
        assert_eq!(config.validity_days, 90);
        assert_eq!(config.store, StoreConfig { retries: 5, backoff_ms: 10 });
    }

    #[test]
    fn test_unknown_field() {
        assert!(toml::from_str::<PolicyConfig>("ec_validaton = true").is_err());
    }

    #[test]
    fn test_backoff() {
        let store = StoreConfig::default();
        assert_eq!(store.backoff(0), Duration::from_millis(50));
        assert_eq!(store.backoff(1), Duration::from_millis(100));
        assert_eq!(store.backoff(3), Duration::from_millis(400));
    }
}
