//! Entity catalog
//!
//! Declares every entity kind the store manages: its columns (used to gate
//! filter attributes), unique keys, and lifecycle hooks. All of it is plain
//! data and explicit match arms; nothing is looked up by name at runtime.

pub mod state;

use std::net::IpAddr;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{str_field, Record};

pub use state::StateValue;

/// Current timestamp in the stored RFC 3339 format
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Entity kinds backed by store tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Host,
    HostNetwork,
    HostState,
    HostLogHistory,
    Cluster,
    ClusterHost,
    ClusterState,
    ClusterHostState,
}

const HOST_COLUMNS: &[&str] = &[
    "id",
    "name",
    "hostname",
    "owner",
    "creator_id",
    "os_name",
    "os_id",
    "os_config",
    "deployed_os_config",
    "config_validated",
    "reinstall_os",
    "created_at",
    "updated_at",
];

const HOST_NETWORK_COLUMNS: &[&str] = &[
    "id",
    "host_id",
    "interface",
    "ip",
    "subnet_id",
    "is_mgmt",
    "is_promiscuous",
    "created_at",
    "updated_at",
];

const HOST_STATE_COLUMNS: &[&str] = &[
    "id",
    "host_id",
    "state",
    "percentage",
    "message",
    "severity",
    "ready",
];

const HOST_LOG_HISTORY_COLUMNS: &[&str] = &[
    "id",
    "host_id",
    "filename",
    "position",
    "partial_line",
    "percentage",
    "message",
    "severity",
    "line_matcher_name",
];

const CLUSTER_COLUMNS: &[&str] = &[
    "id",
    "name",
    "owner",
    "creator_id",
    "os_name",
    "distributed_system_name",
    "reinstall_distributed_system",
    "created_at",
    "updated_at",
];

const CLUSTER_HOST_COLUMNS: &[&str] = &["id", "cluster_id", "host_id"];

const CLUSTER_STATE_COLUMNS: &[&str] = &[
    "id",
    "cluster_id",
    "state",
    "percentage",
    "message",
    "severity",
    "ready",
];

const CLUSTER_HOST_STATE_COLUMNS: &[&str] = &[
    "id",
    "clusterhost_id",
    "state",
    "percentage",
    "message",
    "severity",
    "ready",
];

impl EntityKind {
    /// Table name, used in error messages and logs
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Host => "hosts",
            EntityKind::HostNetwork => "host_networks",
            EntityKind::HostState => "host_states",
            EntityKind::HostLogHistory => "host_log_histories",
            EntityKind::Cluster => "clusters",
            EntityKind::ClusterHost => "clusterhosts",
            EntityKind::ClusterState => "cluster_states",
            EntityKind::ClusterHostState => "clusterhost_states",
        }
    }

    /// Declared columns of the table
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Host => HOST_COLUMNS,
            EntityKind::HostNetwork => HOST_NETWORK_COLUMNS,
            EntityKind::HostState => HOST_STATE_COLUMNS,
            EntityKind::HostLogHistory => HOST_LOG_HISTORY_COLUMNS,
            EntityKind::Cluster => CLUSTER_COLUMNS,
            EntityKind::ClusterHost => CLUSTER_HOST_COLUMNS,
            EntityKind::ClusterState => CLUSTER_STATE_COLUMNS,
            EntityKind::ClusterHostState => CLUSTER_HOST_STATE_COLUMNS,
        }
    }

    /// Whether `name` is a declared column
    pub fn has_column(&self, name: &str) -> bool {
        self.columns().contains(&name)
    }

    /// Uniqueness constraints enforced on create and update
    pub fn unique_keys(&self) -> &'static [&'static [&'static str]] {
        match self {
            EntityKind::Host => &[&["name"]],
            EntityKind::HostNetwork => &[&["ip"]],
            EntityKind::HostState => &[&["host_id"]],
            EntityKind::HostLogHistory => &[&["host_id", "filename"]],
            EntityKind::Cluster => &[&["name"]],
            EntityKind::ClusterHost => &[&["cluster_id", "host_id"]],
            EntityKind::ClusterState => &[&["cluster_id"]],
            EntityKind::ClusterHostState => &[&["clusterhost_id"]],
        }
    }

    /// Whether the table carries audit timestamps
    pub fn has_timestamps(&self) -> bool {
        matches!(
            self,
            EntityKind::Host | EntityKind::HostNetwork | EntityKind::Cluster
        )
    }

    /// Post-create hook: fill defaults a fresh record is expected to carry
    pub fn initialize(&self, record: &mut Record) {
        match self {
            EntityKind::Host => {
                if is_unset(record, "hostname") {
                    if let Some(name) = str_field(record, "name").map(str::to_string) {
                        record.insert("hostname".into(), Value::String(name));
                    }
                }
                default_field(record, "os_config", Value::Object(Default::default()));
                default_field(record, "config_validated", Value::Bool(false));
                // a new host has not been deployed, so it starts reinstallable
                default_field(record, "reinstall_os", Value::Bool(true));
            }
            EntityKind::HostNetwork => {
                default_field(record, "is_mgmt", Value::Bool(false));
                default_field(record, "is_promiscuous", Value::Bool(false));
                default_field(record, "subnet_id", Value::Null);
            }
            EntityKind::HostState | EntityKind::ClusterState | EntityKind::ClusterHostState => {
                default_field(
                    record,
                    "state",
                    Value::String(StateValue::Uninitialized.as_str().into()),
                );
                default_field(record, "percentage", Value::from(0));
                default_field(record, "ready", Value::Bool(false));
            }
            EntityKind::HostLogHistory => {
                default_field(record, "position", Value::from(0));
                default_field(record, "partial_line", Value::String(String::new()));
                default_field(record, "percentage", Value::from(0));
            }
            EntityKind::Cluster => {
                default_field(record, "reinstall_distributed_system", Value::Bool(true));
            }
            EntityKind::ClusterHost => {}
        }
    }

    /// Structural validation hook, run after create and after update
    pub fn validate(&self, record: &Record) -> Result<()> {
        match self {
            EntityKind::Host | EntityKind::Cluster => {
                require_nonempty(record, "name", self.table())
            }
            EntityKind::HostNetwork => {
                require_nonempty(record, "interface", self.table())?;
                let ip = str_field(record, "ip").ok_or_else(|| {
                    Error::invalid_parameter("host network does not set ip")
                })?;
                ip.parse::<IpAddr>().map_err(|_| {
                    Error::invalid_parameter(format!("ip address {} format incorrect", ip))
                })?;
                Ok(())
            }
            EntityKind::HostState | EntityKind::ClusterState | EntityKind::ClusterHostState => {
                if let Some(state) = str_field(record, "state") {
                    if StateValue::parse(state).is_none() {
                        return Err(Error::invalid_parameter(format!(
                            "unknown state value {}",
                            state
                        )));
                    }
                }
                if let Some(percentage) = record.get("percentage").and_then(Value::as_f64) {
                    if !(0.0..=100.0).contains(&percentage) {
                        return Err(Error::invalid_parameter(format!(
                            "percentage {} out of range",
                            percentage
                        )));
                    }
                }
                Ok(())
            }
            EntityKind::HostLogHistory => require_nonempty(record, "filename", self.table()),
            EntityKind::ClusterHost => Ok(()),
        }
    }

    /// Pre-persist hook for single-record updates
    pub fn on_update(&self, record: &mut Record) {
        if self.has_timestamps() {
            record.insert("updated_at".into(), Value::String(now_timestamp()));
        }
    }
}

fn is_unset(record: &Record, key: &str) -> bool {
    matches!(record.get(key), None | Some(Value::Null))
}

fn default_field(record: &mut Record, key: &str, value: Value) {
    if is_unset(record, key) {
        record.insert(key.to_string(), value);
    }
}

fn require_nonempty(record: &Record, key: &str, table: &str) -> Result<()> {
    match str_field(record, key) {
        Some(value) if !value.is_empty() => Ok(()),
        _ => Err(Error::invalid_parameter(format!(
            "record in table {} does not set {}",
            table, key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_host_initialize_defaults() {
        let mut rec = record(json!({"name": "web-1"}));
        EntityKind::Host.initialize(&mut rec);

        assert_eq!(str_field(&rec, "hostname"), Some("web-1"));
        assert_eq!(rec.get("os_config"), Some(&json!({})));
        assert_eq!(rec.get("reinstall_os"), Some(&json!(true)));
        assert_eq!(rec.get("config_validated"), Some(&json!(false)));
    }

    #[test]
    fn test_host_initialize_keeps_explicit_hostname() {
        let mut rec = record(json!({"name": "web-1", "hostname": "node-a"}));
        EntityKind::Host.initialize(&mut rec);
        assert_eq!(str_field(&rec, "hostname"), Some("node-a"));
    }

    #[test]
    fn test_state_initialize_defaults() {
        let mut rec = record(json!({"host_id": 1}));
        EntityKind::HostState.initialize(&mut rec);

        assert_eq!(str_field(&rec, "state"), Some("UNINITIALIZED"));
        assert_eq!(rec.get("ready"), Some(&json!(false)));
    }

    #[test]
    fn test_network_validate_rejects_bad_ip() {
        let rec = record(json!({"host_id": 1, "interface": "eth0", "ip": "300.1.1.1"}));
        let err = EntityKind::HostNetwork.validate(&rec).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_network_validate_accepts_good_ip() {
        let rec = record(json!({"host_id": 1, "interface": "eth0", "ip": "10.0.0.1"}));
        assert!(EntityKind::HostNetwork.validate(&rec).is_ok());
    }

    #[test]
    fn test_state_validate_rejects_unknown_state() {
        let rec = record(json!({"host_id": 1, "state": "DONE"}));
        assert!(EntityKind::HostState.validate(&rec).is_err());
    }

    #[test]
    fn test_state_validate_rejects_out_of_range_percentage() {
        let rec = record(json!({"host_id": 1, "state": "INSTALLING", "percentage": 140}));
        assert!(EntityKind::HostState.validate(&rec).is_err());
    }

    #[test]
    fn test_filter_column_gate() {
        assert!(EntityKind::Host.has_column("os_name"));
        assert!(!EntityKind::Host.has_column("mac"));
    }
}
