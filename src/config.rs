//! Consistency Configuration
//!
//! Account-level settings and the retry/barrier policy constants used by the
//! readers, the writer and the retry policies. Configured externally (file,
//! env), immutable after the client is built.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment override for the session retry initial backoff.
pub const ENV_SESSION_RETRY_INITIAL_BACKOFF_MS: &str = "REPLICORE_SESSION_RETRY_INITIAL_BACKOFF_MS";

/// Environment override for the session retry maximum backoff.
pub const ENV_SESSION_RETRY_MAXIMUM_BACKOFF_MS: &str = "REPLICORE_SESSION_RETRY_MAXIMUM_BACKOFF_MS";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Consistency level, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    Session,
    ConsistentPrefix,
    Eventual,
}

impl ConsistencyLevel {
    /// Returns the wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "Strong",
            Self::BoundedStaleness => "BoundedStaleness",
            Self::Session => "Session",
            Self::ConsistentPrefix => "ConsistentPrefix",
            Self::Eventual => "Eventual",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Strong => 4,
            Self::BoundedStaleness => 3,
            Self::Session => 2,
            Self::ConsistentPrefix => 1,
            Self::Eventual => 0,
        }
    }

    /// Whether `self` gives a stronger guarantee than `other`.
    pub fn is_stronger_than(&self, other: ConsistencyLevel) -> bool {
        self.rank() > other.rank()
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Strong" => Ok(Self::Strong),
            "BoundedStaleness" => Ok(Self::BoundedStaleness),
            "Session" => Ok(Self::Session),
            "ConsistentPrefix" => Ok(Self::ConsistentPrefix),
            "Eventual" => Ok(Self::Eventual),
            other => Err(format!("unknown consistency level '{}'", other)),
        }
    }
}

/// Replica-set sizing for a class of partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    /// Replicas in a full replica set
    pub max_replica_set_size: usize,
    /// Smallest replica set still accepting writes
    pub min_replica_set_size: usize,
}

impl ReplicationPolicy {
    /// Read quorum: a strict majority of the full replica set.
    pub fn read_quorum(&self) -> usize {
        self.max_replica_set_size / 2 + 1
    }
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        Self {
            max_replica_set_size: 4,
            min_replica_set_size: 3,
        }
    }
}

/// Account-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Default consistency for requests without an override
    #[serde(default = "default_consistency_level")]
    pub default_consistency_level: ConsistencyLevel,

    /// Replication policy for user partitions
    #[serde(default)]
    pub user_replication_policy: ReplicationPolicy,

    /// Replication policy for the master partition
    #[serde(default)]
    pub system_replication_policy: ReplicationPolicy,

    /// Global strong capability. Fixed on; no runtime negotiation exists.
    #[serde(default = "default_true")]
    pub enable_global_strong: bool,

    /// Whether the account accepts writes in every region
    #[serde(default)]
    pub use_multiple_write_locations: bool,
}

fn default_consistency_level() -> ConsistencyLevel {
    ConsistencyLevel::Session
}

fn default_true() -> bool {
    true
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            default_consistency_level: default_consistency_level(),
            user_replication_policy: ReplicationPolicy::default(),
            system_replication_policy: ReplicationPolicy::default(),
            enable_global_strong: true,
            use_multiple_write_locations: false,
        }
    }
}

/// Quorum read and read barrier constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    pub max_read_quorum_retries: u32,
    pub max_barrier_read_retries: u32,
    pub barrier_retry_interval_ms: u64,
    pub max_primary_read_retries: u32,
    pub max_barrier_retries_multi_region: u32,
    pub barrier_retry_interval_multi_region_ms: u64,
    pub max_short_barrier_retries_multi_region: u32,
    pub short_barrier_retry_interval_multi_region_ms: u64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            max_read_quorum_retries: 6,
            max_barrier_read_retries: 6,
            barrier_retry_interval_ms: 5,
            max_primary_read_retries: 6,
            max_barrier_retries_multi_region: 30,
            barrier_retry_interval_multi_region_ms: 30,
            max_short_barrier_retries_multi_region: 4,
            short_barrier_retry_interval_multi_region_ms: 10,
        }
    }
}

impl QuorumConfig {
    pub fn barrier_retry_interval(&self) -> Duration {
        Duration::from_millis(self.barrier_retry_interval_ms)
    }
}

/// Global strong write barrier constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBarrierConfig {
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    pub max_short_retries: u32,
    pub short_retry_interval_ms: u64,
}

impl Default for WriteBarrierConfig {
    fn default() -> Self {
        Self {
            max_retries: 30,
            retry_interval_ms: 30,
            max_short_retries: 4,
            short_retry_interval_ms: 10,
        }
    }
}

/// Gone / retry-with policy constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoneRetryConfig {
    pub budget_secs: u64,
    pub strong_budget_secs: u64,
    pub initial_backoff_secs: u64,
    pub backoff_multiplier: u64,
    pub max_backoff_secs: u64,
    pub max_invalid_partition_retries: u32,
    pub min_failed_replicas_for_connectivity: usize,
    pub detect_connectivity_issues: bool,
}

impl Default for GoneRetryConfig {
    fn default() -> Self {
        Self {
            budget_secs: 30,
            strong_budget_secs: 60,
            initial_backoff_secs: 1,
            backoff_multiplier: 2,
            max_backoff_secs: 15,
            max_invalid_partition_retries: 2,
            min_failed_replicas_for_connectivity: 3,
            detect_connectivity_issues: true,
        }
    }
}

/// Session token mismatch retry constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRetryConfig {
    pub budget_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SessionRetryConfig {
    fn default() -> Self {
        Self {
            budget_ms: 5000,
            initial_backoff_ms: 5,
            max_backoff_ms: 50,
        }
    }
}

impl SessionRetryConfig {
    /// Apply backoff overrides from the environment. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(ms) = read_env_ms(ENV_SESSION_RETRY_INITIAL_BACKOFF_MS) {
            self.initial_backoff_ms = ms;
        }
        if let Some(ms) = read_env_ms(ENV_SESSION_RETRY_MAXIMUM_BACKOFF_MS) {
            self.max_backoff_ms = ms;
        }
    }
}

fn read_env_ms(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Endpoint failover, session and throttling retry constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientRetryConfig {
    pub enable_endpoint_discovery: bool,
    pub max_failover_retries: u32,
    pub failover_retry_interval_ms: u64,
    pub max_service_unavailable_retries: u32,
    pub max_throttle_retries: u32,
    pub max_throttle_wait_secs: u64,
}

impl Default for ClientRetryConfig {
    fn default() -> Self {
        Self {
            enable_endpoint_discovery: true,
            max_failover_retries: 120,
            failover_retry_interval_ms: 1000,
            max_service_unavailable_retries: 1,
            max_throttle_retries: 9,
            max_throttle_wait_secs: 30,
        }
    }
}

/// Full consistency-core configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub quorum: QuorumConfig,

    #[serde(default)]
    pub write_barrier: WriteBarrierConfig,

    #[serde(default)]
    pub gone_retry: GoneRetryConfig,

    #[serde(default)]
    pub session_retry: SessionRetryConfig,

    #[serde(default)]
    pub client_retry: ClientRetryConfig,

    /// Deadline for one logical request across all attempts
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl ConsistencyConfig {
    /// Parse a JSON document; missing sections take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&raw)?;
        config.session_retry.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, policy) in [
            ("user", &self.account.user_replication_policy),
            ("system", &self.account.system_replication_policy),
        ] {
            if policy.max_replica_set_size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} replication policy needs at least one replica",
                    name
                )));
            }
            if policy.min_replica_set_size > policy.max_replica_set_size {
                return Err(ConfigError::Invalid(format!(
                    "{} replication policy min_replica_set_size exceeds max_replica_set_size",
                    name
                )));
            }
        }
        if self.gone_retry.backoff_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "gone_retry.backoff_multiplier must be positive".to_string(),
            ));
        }
        if self.session_retry.initial_backoff_ms > self.session_retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "session_retry.initial_backoff_ms exceeds max_backoff_ms".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_policy_constants() {
        let config = ConsistencyConfig::default();
        assert_eq!(config.quorum.max_read_quorum_retries, 6);
        assert_eq!(config.quorum.barrier_retry_interval_ms, 5);
        assert_eq!(config.write_barrier.max_retries, 30);
        assert_eq!(config.gone_retry.initial_backoff_secs, 1);
        assert_eq!(config.gone_retry.max_backoff_secs, 15);
        assert_eq!(config.session_retry.max_backoff_ms, 50);
        assert!(config.account.enable_global_strong);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_quorum_is_majority() {
        let three = ReplicationPolicy {
            max_replica_set_size: 3,
            min_replica_set_size: 2,
        };
        assert_eq!(three.read_quorum(), 2);
        assert_eq!(ReplicationPolicy::default().read_quorum(), 3);
    }

    #[test]
    fn test_consistency_ordering() {
        assert!(ConsistencyLevel::Strong.is_stronger_than(ConsistencyLevel::Session));
        assert!(!ConsistencyLevel::Eventual.is_stronger_than(ConsistencyLevel::Session));
        assert_eq!(
            "BoundedStaleness".parse::<ConsistencyLevel>().unwrap(),
            ConsistencyLevel::BoundedStaleness
        );
        assert!("Linearizable".parse::<ConsistencyLevel>().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = ConsistencyConfig::from_json_str(
            r#"{
                "account": { "default_consistency_level": "Strong" },
                "quorum": { "max_barrier_read_retries": 3 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.account.default_consistency_level, ConsistencyLevel::Strong);
        assert_eq!(config.quorum.max_barrier_read_retries, 3);
        assert_eq!(config.quorum.max_read_quorum_retries, 6);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let result = ConsistencyConfig::from_json_str(
            r#"{
                "account": {
                    "user_replication_policy": {
                        "max_replica_set_size": 2,
                        "min_replica_set_size": 3
                    }
                }
            }"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "request_timeout_secs": 10 }}"#).unwrap();
        let config = ConsistencyConfig::load(file.path()).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ConsistencyConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
