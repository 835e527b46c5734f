// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications, clippy::all)]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use credential::{classify, CaCredential, Credential, EndorsementCredential, PlatformCredential};
use tracing::{debug, info};
use validation::{
    CredentialStore, DeviceInfo, MemoryStore, PolicyConfig, RetryingStore, SupplyChainValidationEngine,
};

/// Decodes TCG credentials and validates a device's supply chain.
#[derive(Parser, Debug)]
#[command(name = "provenance", version, about)]
struct Cli {
    /// Log as JSON lines instead of text.
    #[arg(long, env = "PROVENANCE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the structural type of a certificate.
    Classify { file: PathBuf },

    /// Print a decoded credential as JSON.
    Inspect { file: PathBuf },

    /// Validate a device's credentials and print the summary as JSON.
    Validate {
        /// Policy file (TOML). All credential checks are enabled without one.
        #[arg(long, env = "PROVENANCE_POLICY")]
        policy: Option<PathBuf>,

        /// Device inventory (TOML, or JSON with a `.json` extension).
        #[arg(long, env = "PROVENANCE_DEVICE")]
        device: PathBuf,

        /// Endorsement credential.
        #[arg(long, env = "PROVENANCE_EC")]
        ec: Option<PathBuf>,

        /// Platform credentials, base and deltas.
        #[arg(long, env = "PROVENANCE_PC", value_delimiter = ',')]
        pc: Vec<PathBuf>,

        /// Trusted certificate authorities, PEM bundles or single DER files.
        #[arg(long, env = "PROVENANCE_CA", value_delimiter = ',')]
        ca: Vec<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    if json {
        tracing_subscriber::fmt::fmt()
            .json()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Reads every certificate of a PEM bundle, or a lone DER certificate.
fn read_cas(bytes: &[u8]) -> anyhow::Result<Vec<CaCredential>> {
    let mut ders = rustls_pemfile::certs(&mut &bytes[..]).context("invalid PEM bundle")?;
    if ders.is_empty() {
        ders.push(bytes.to_vec());
    }

    ders.iter()
        .map(|der| CaCredential::from_bytes(der).context("invalid CA certificate"))
        .collect()
}

fn read_device(path: &Path) -> anyhow::Result<DeviceInfo> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw).context("failed to parse device info"),
        _ => toml::from_str(&raw).context("failed to parse device info"),
    }
}

fn read_policy(path: Option<&Path>) -> anyhow::Result<PolicyConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).context("failed to read policy file")?;
            toml::from_str(&raw).context("failed to parse policy")
        }
        None => Ok(PolicyConfig::default()),
    }
}

fn validate(
    policy: Option<&Path>,
    device: &Path,
    ec: Option<&Path>,
    pcs: &[PathBuf],
    cas: &[PathBuf],
) -> anyhow::Result<String> {
    let policy = read_policy(policy)?;
    let device = read_device(device)?;

    let store = RetryingStore::new(MemoryStore::new(), policy.store);
    for path in cas {
        for ca in read_cas(&read(path)?)? {
            debug!(subject = ?ca.common.subject, "trusting certificate authority");
            store.save(ca.into())?;
        }
    }

    let ec = match ec {
        Some(path) => Some(EndorsementCredential::parse_with_possible_header(&read(path)?)?),
        None => None,
    };
    let pcs = pcs
        .iter()
        .map(|path| -> anyhow::Result<_> { Ok(PlatformCredential::parse_with_possible_header(&read(path)?)?) })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let summary = SupplyChainValidationEngine::new(&store, &policy).validate(ec.as_ref(), &pcs, &device)?;
    info!(id = %summary.id, result = %summary.overall_result, "validated {}", device.name);
    Ok(serde_json::to_string_pretty(&summary)?)
}

fn run(command: Command) -> anyhow::Result<String> {
    match command {
        Command::Classify { file } => Ok(serde_json::to_string(&classify(&read(&file)?)?)?),
        Command::Inspect { file } => {
            let bytes = read(&file)?;
            if bytes.is_empty() {
                bail!("{} is empty", file.display());
            }
            Ok(serde_json::to_string_pretty(&Credential::from_bytes(&bytes)?)?)
        }
        Command::Validate {
            policy,
            device,
            ec,
            pc,
            ca,
        } => validate(policy.as_deref(), &device, ec.as_deref(), &pc, &ca),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    println!("{}", run(cli.command)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;
    use credential::fixtures::KeyPair;

    #[test]
    fn cli() {
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "provenance",
            "validate",
            "--device",
            "device.toml",
            "--pc",
            "base.der,delta.der",
            "--ca",
            "roots.pem",
        ])
        .unwrap();
        match cli.command {
            Command::Validate { pc, ca, ec, .. } => {
                assert_eq!(pc, [PathBuf::from("base.der"), PathBuf::from("delta.der")]);
                assert_eq!(ca, [PathBuf::from("roots.pem")]);
                assert!(ec.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn lone_der_authority() {
        let root = KeyPair::root("O=Example,CN=Example Root").unwrap();
        let cas = read_cas(&root.cert).unwrap();
        assert_eq!(cas.len(), 1);
        assert!(cas[0].common.is_self_signed());
    }

    #[test]
    fn garbage_authority() {
        assert!(read_cas(b"not a certificate").is_err());
    }

    #[test]
    fn default_policy() {
        assert_eq!(read_policy(None).unwrap(), PolicyConfig::default());
    }
}
