//! Node and protocol configuration.
//!
//! Durations are milliseconds. Every field has a default, so a partial JSON
//! document is a valid configuration.

use serde::{Deserialize, Serialize};

use vectorsync_core::{GroupId, NodeId};

use crate::error::{Result, SyncError};
use crate::messages::limits;

/// Protocol timing and sizing parameters shared by every member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Interval between probe rounds.
    pub probe_interval_ms: u64,
    /// How long a prober collects replies.
    pub reply_window_ms: u64,
    /// Upper bound of the random delay before answering a probe.
    pub probe_reply_jitter_ms: u64,
    /// Minimum number of distinct active repliers before anyone may sleep.
    pub quorum_threshold: usize,
    /// Sync rounds run by a node before it goes dormant.
    pub final_sync_rounds: u32,
    /// Spacing of final-sync rounds; also the settle time after waking.
    pub final_sync_interval_ms: u64,
    /// How long a node stays dormant.
    pub sleep_duration_ms: u64,
    /// Time to wait for a fetch reply before retrying.
    pub fetch_timeout_ms: u64,
    /// Retries per fetch before giving up.
    pub fetch_retries: u32,
    /// Upper bound of the random delay before sending a SyncACK.
    pub ack_jitter_ms: u64,
    /// Most records requested by one fetch.
    pub max_batch_size: u64,
    /// Periodic sync interval. `None` disables periodic sync.
    pub sync_interval_ms: Option<u64>,
    /// Snapshot interval. `None` disables snapshots.
    pub snapshot_interval_ms: Option<u64>,
    /// Run probe rounds and accept sleep commands.
    pub duty_cycling: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 30_000,
            reply_window_ms: 2_000,
            probe_reply_jitter_ms: 500,
            quorum_threshold: 2,
            final_sync_rounds: 3,
            final_sync_interval_ms: 1_000,
            sleep_duration_ms: 60_000,
            fetch_timeout_ms: 1_000,
            fetch_retries: 1,
            ack_jitter_ms: 200,
            max_batch_size: 50,
            sync_interval_ms: None,
            snapshot_interval_ms: None,
            duty_cycling: true,
        }
    }
}

impl ProtocolConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::InvalidConfig(e.to_string()))
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SyncError::InvalidConfig(e.to_string()))
    }

    /// Reject values that would stall the protocol.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 || self.max_batch_size > limits::MAX_FETCH_RANGE {
            return Err(SyncError::InvalidConfig(format!(
                "max_batch_size must be in 1..={}",
                limits::MAX_FETCH_RANGE
            )));
        }
        if self.quorum_threshold == 0 {
            return Err(SyncError::InvalidConfig("quorum_threshold must be > 0".into()));
        }
        if self.final_sync_rounds == 0 {
            return Err(SyncError::InvalidConfig(
                "final_sync_rounds must be > 0".into(),
            ));
        }
        if self.probe_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "probe_interval_ms must be > 0".into(),
            ));
        }
        if self.probe_reply_jitter_ms >= self.reply_window_ms {
            return Err(SyncError::InvalidConfig(
                "probe_reply_jitter_ms must be below reply_window_ms".into(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig("fetch_timeout_ms must be > 0".into()));
        }
        if self.final_sync_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "final_sync_interval_ms must be > 0".into(),
            ));
        }
        if self.sleep_duration_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sleep_duration_ms must be > 0".into(),
            ));
        }
        if self.sync_interval_ms == Some(0) || self.snapshot_interval_ms == Some(0) {
            return Err(SyncError::InvalidConfig("intervals must be > 0".into()));
        }
        Ok(())
    }
}

/// Identity of one node plus the protocol parameters it runs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub group_id: GroupId,
    pub node_id: NodeId,
    pub group_size: usize,
    /// Seed for the node's jitter source.
    pub rng_seed: u64,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl NodeConfig {
    /// Create a config with default protocol parameters.
    pub fn new(group_id: impl Into<GroupId>, node_id: NodeId, group_size: usize) -> Self {
        Self {
            group_id: group_id.into(),
            node_id,
            group_size,
            rng_seed: node_id.as_u64(),
            protocol: ProtocolConfig::default(),
        }
    }

    /// Replace the protocol parameters.
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// Replace the jitter seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::InvalidConfig(e.to_string()))
    }

    /// Check identity fields and protocol parameters.
    pub fn validate(&self) -> Result<()> {
        if self.group_id.is_empty() {
            return Err(SyncError::InvalidConfig("group_id must not be empty".into()));
        }
        if self.group_size == 0 {
            return Err(SyncError::InvalidConfig("group_size must be > 0".into()));
        }
        if self.node_id.slot() >= self.group_size {
            return Err(SyncError::InvalidConfig(format!(
                "node_id {} outside group of size {}",
                self.node_id, self.group_size
            )));
        }
        self.protocol.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.probe_interval_ms, 30_000);
        assert_eq!(config.quorum_threshold, 2);
        assert_eq!(config.final_sync_rounds, 3);
        assert_eq!(config.max_batch_size, 50);
        assert!(config.sync_interval_ms.is_none());
        assert!(config.duty_cycling);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ProtocolConfig::from_json(r#"{"quorum_threshold": 4}"#).unwrap();
        assert_eq!(config.quorum_threshold, 4);
        assert_eq!(config.reply_window_ms, 2_000);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = ProtocolConfig::default();
        config.sync_interval_ms = Some(5_000);
        let back = ProtocolConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            ProtocolConfig::from_json("{not json"),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_node_config_validate() {
        assert!(NodeConfig::new("g", NodeId(2), 3).validate().is_ok());
        assert!(NodeConfig::new("g", NodeId(3), 3).validate().is_err());
        assert!(NodeConfig::new("", NodeId(0), 3).validate().is_err());
        assert!(NodeConfig::new("g", NodeId(0), 0).validate().is_err());

        let mut protocol = ProtocolConfig::default();
        protocol.max_batch_size = 0;
        let config = NodeConfig::new("g", NodeId(0), 1).with_protocol(protocol);
        assert!(config.validate().is_err());

        let zeroed: [fn(&mut ProtocolConfig); 3] = [
            |p| p.fetch_timeout_ms = 0,
            |p| p.final_sync_interval_ms = 0,
            |p| p.sleep_duration_ms = 0,
        ];
        for zero in zeroed {
            let mut protocol = ProtocolConfig::default();
            zero(&mut protocol);
            let config = NodeConfig::new("g", NodeId(0), 2).with_protocol(protocol.clone());
            assert!(
                matches!(config.validate(), Err(SyncError::InvalidConfig(_))),
                "accepted {:?}",
                protocol
            );
        }
    }

    #[test]
    fn test_node_config_json() {
        let json = r#"{"group_id": "g", "node_id": 1, "group_size": 4, "rng_seed": 9}"#;
        let config = NodeConfig::from_json(json).unwrap();
        assert_eq!(config.node_id, NodeId(1));
        assert_eq!(config.protocol, ProtocolConfig::default());
    }
}
