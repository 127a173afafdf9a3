//! Configuration file support for the registry and its tooling.
//!
//! Every section may be omitted from the TOML file; missing values fall back
//! to the `DEFAULT_*` constants below.

use crate::contributor_tree::TreeRebuilder;
use crate::error::{RegistryError, RegistryResult};
use crate::ethereum::parse_address;
use crate::governance::AdminPolicy;
use crate::membership::MIN_ROOT_WINDOW;
use anyhow::{Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_THRESHOLD: usize = 2;
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_VOTING_PERIOD_SECS: u64 = 60;
pub const DEFAULT_ROOT_WINDOW_SIZE: usize = 2;
pub const DEFAULT_TREE_DEPTH: usize = 20;
pub const DEFAULT_REBUILD_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_CONTRIBUTORS_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_PROOF_FILE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_PROOF_MAX_AGE_SECS: u64 = 86400;
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub contributors: ContributorsConfig,
    #[serde(default)]
    pub proof: ProofConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub content_store: ContentStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Initial admin addresses, hex encoded.
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default)]
    pub admin_policy: AdminPolicy,
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    #[serde(default)]
    pub voting_enabled: bool,
    #[serde(default = "default_voting_period_secs")]
    pub voting_period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    #[serde(default = "default_root_window_size")]
    pub root_window_size: usize,
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,
    #[serde(default = "default_rebuild_interval_secs")]
    pub rebuild_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorsConfig {
    #[serde(default = "default_max_contributors_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub default_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    #[serde(default = "default_max_proof_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_proof_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_proof_output_file")]
    pub output_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_keys_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentStoreConfig {
    /// Retrieval endpoints, tried in order.
    #[serde(default)]
    pub gateways: Vec<String>,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            admin_policy: AdminPolicy::default(),
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            voting_enabled: false,
            voting_period_secs: DEFAULT_VOTING_PERIOD_SECS,
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            root_window_size: DEFAULT_ROOT_WINDOW_SIZE,
            tree_depth: DEFAULT_TREE_DEPTH,
            rebuild_interval_secs: DEFAULT_REBUILD_INTERVAL_SECS,
        }
    }
}

impl Default for ContributorsConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_CONTRIBUTORS_FILE_SIZE,
            default_file: None,
        }
    }
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_PROOF_FILE_SIZE,
            max_age_secs: DEFAULT_PROOF_MAX_AGE_SECS,
            output_file: default_proof_output_file(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_keys_dir(),
        }
    }
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            gateways: Vec::new(),
            timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
        }
    }
}

fn default_threshold() -> usize {
    DEFAULT_THRESHOLD
}

fn default_approval_timeout_secs() -> u64 {
    DEFAULT_APPROVAL_TIMEOUT_SECS
}

fn default_voting_period_secs() -> u64 {
    DEFAULT_VOTING_PERIOD_SECS
}

fn default_root_window_size() -> usize {
    DEFAULT_ROOT_WINDOW_SIZE
}

fn default_tree_depth() -> usize {
    DEFAULT_TREE_DEPTH
}

fn default_rebuild_interval_secs() -> u64 {
    DEFAULT_REBUILD_INTERVAL_SECS
}

fn default_max_contributors_file_size() -> u64 {
    DEFAULT_MAX_CONTRIBUTORS_FILE_SIZE
}

fn default_max_proof_file_size() -> u64 {
    DEFAULT_MAX_PROOF_FILE_SIZE
}

fn default_proof_max_age_secs() -> u64 {
    DEFAULT_PROOF_MAX_AGE_SECS
}

fn default_proof_output_file() -> PathBuf {
    PathBuf::from("proof.json")
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from(".keys")
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

impl GovernanceConfig {
    /// Parses the configured admin addresses.
    pub fn admin_addresses(&self) -> Result<Vec<Address>> {
        self.admins
            .iter()
            .map(|a| parse_address(a).with_context(|| format!("Invalid admin address '{a}'")))
            .collect()
    }
}

impl MembershipConfig {
    /// Periodic contributor tree rebuilder for this depth and interval.
    #[must_use]
    pub fn tree_rebuilder(&self) -> TreeRebuilder {
        TreeRebuilder::new(self.tree_depth, self.rebuild_interval_secs)
    }
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn load_from_file_or_default(path: &PathBuf) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Checks the membership parameters alone, for tooling that has no
    /// governance section.
    pub fn validate_membership(&self) -> RegistryResult<()> {
        if self.membership.root_window_size < MIN_ROOT_WINDOW {
            return Err(RegistryError::InvalidConfig(format!(
                "root_window_size must be at least {MIN_ROOT_WINDOW}, got {}",
                self.membership.root_window_size
            )));
        }
        if self.membership.tree_depth == 0 {
            return Err(RegistryError::InvalidConfig(
                "tree_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> RegistryResult<()> {
        let admins = self.governance.admins.len();
        if self.governance.threshold == 0 {
            return Err(RegistryError::InvalidConfig(
                "threshold must be at least 1".to_string(),
            ));
        }
        if self.governance.threshold > admins {
            return Err(RegistryError::InvalidConfig(format!(
                "threshold {} exceeds the {admins} configured admins",
                self.governance.threshold
            )));
        }
        self.validate_membership()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMINS: &str = r#"
        [governance]
        admins = [
            "0x1111111111111111111111111111111111111111",
            "0x2222222222222222222222222222222222222222",
            "0x3333333333333333333333333333333333333333",
        ]
    "#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.governance.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.governance.admin_policy, AdminPolicy::SingleAdmin);
        assert!(!config.governance.voting_enabled);
        assert_eq!(config.membership.root_window_size, 2);
        assert_eq!(config.membership.tree_depth, 20);
        assert_eq!(config.proof.max_file_size, DEFAULT_MAX_PROOF_FILE_SIZE);
        assert_eq!(config.content_store.timeout_secs, 5);
    }

    #[test]
    fn test_serialize_deserialize_config() {
        let config: Config = toml::from_str(ADMINS).unwrap();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(deserialized.governance.admins, config.governance.admins);
        assert_eq!(config.proof.output_file, deserialized.proof.output_file);
    }

    #[test]
    fn test_custom_config() {
        let config_toml = r#"
            [governance]
            admins = ["0x1111111111111111111111111111111111111111"]
            threshold = 1
            admin_policy = "quorum"
            voting_enabled = true

            [membership]
            root_window_size = 4
            tree_depth = 8

            [content_store]
            gateways = ["https://gateway.pinata.cloud/ipfs/", "https://ipfs.io/ipfs/"]
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.governance.threshold, 1);
        assert_eq!(config.governance.admin_policy, AdminPolicy::Quorum);
        assert!(config.governance.voting_enabled);
        assert_eq!(config.membership.root_window_size, 4);
        assert_eq!(config.content_store.gateways.len(), 2);
        assert!(config.validate().is_ok());
        assert_eq!(config.governance.admin_addresses().unwrap().len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let mut config: Config = toml::from_str(ADMINS).unwrap();
        assert!(config.validate().is_ok());

        config.governance.threshold = 4;
        assert!(config.validate().is_err());
        config.governance.threshold = 0;
        assert!(config.validate().is_err());
        config.governance.threshold = 3;
        config.membership.root_window_size = 1;
        assert!(config.validate().is_err());
        config.membership.root_window_size = 2;
        config.membership.tree_depth = 0;
        assert!(matches!(
            config.validate(),
            Err(RegistryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_admin_address_reported() {
        let mut config = Config::default();
        config.governance.admins = vec!["0x1234".to_string()];
        assert!(config.governance.admin_addresses().is_err());
    }
}
