//! Editability, validation and structural rules for hosts and clusters

use crate::error::{Error, Result};
use crate::observability::Logger;
use crate::pipeline::UserContext;
use crate::store::{bool_field, i64_field, str_field, Record};

use crate::model::StateValue;

fn display_name(record: &Record) -> &str {
    str_field(record, "name").unwrap_or("<unnamed>")
}

fn not_editable(host: &Record, exception_when_not_editable: bool) -> Result<bool> {
    if exception_when_not_editable {
        Err(Error::forbidden(format!(
            "host {} is not editable",
            display_name(host)
        )))
    } else {
        Ok(false)
    }
}

/// Whether a host's mutable fields may currently be changed.
///
/// With reinstall intent only an in-flight install blocks; without it a
/// cleared reinstall flag blocks. Either way the caller must be an
/// administrator or the host's creator. A violation raises `Forbidden` or
/// returns `false`, selectable via `exception_when_not_editable`.
pub fn is_host_editable(
    host: &Record,
    state: &Record,
    user: &UserContext,
    reinstall_os_set: bool,
    exception_when_not_editable: bool,
) -> Result<bool> {
    if reinstall_os_set {
        if str_field(state, "state") == Some(StateValue::Installing.as_str()) {
            Logger::debug(
                "host_not_editable",
                &[("reason", "installing host is not editable".to_string())],
            );
            return not_editable(host, exception_when_not_editable);
        }
    } else if !bool_field(host, "reinstall_os") {
        Logger::debug(
            "host_not_editable",
            &[(
                "reason",
                "host is not editable when not reinstall os".to_string(),
            )],
        );
        return not_editable(host, exception_when_not_editable);
    }
    if !user.is_admin && i64_field(host, "creator_id") != Some(user.id) {
        Logger::debug(
            "host_not_editable",
            &[(
                "reason",
                "user does not have permission to edit host".to_string(),
            )],
        );
        return not_editable(host, exception_when_not_editable);
    }
    Ok(true)
}

/// A host's configuration must be validated before deploy/power actions or
/// deployed-config writes
pub fn is_host_validated(host: &Record) -> Result<()> {
    if !bool_field(host, "config_validated") {
        return Err(Error::forbidden(format!(
            "host {} is not validated",
            display_name(host)
        )));
    }
    Ok(())
}

/// Structural validation: hostname set, at least one network, exactly one
/// management interface which must not be promiscuous
pub fn validate_host(host: &Record, networks: &[Record]) -> Result<()> {
    if str_field(host, "hostname").map_or(true, str::is_empty) {
        return Err(Error::invalid_parameter(format!(
            "host {} does not set hostname",
            display_name(host)
        )));
    }
    if networks.is_empty() {
        return Err(Error::invalid_parameter(format!(
            "host {} does not have any network",
            display_name(host)
        )));
    }
    let mut mgmt_interface_set = false;
    for network in networks {
        if bool_field(network, "is_mgmt") {
            if mgmt_interface_set {
                return Err(Error::invalid_parameter(format!(
                    "host {} sets mgmt on multiple interfaces",
                    display_name(host)
                )));
            }
            if bool_field(network, "is_promiscuous") {
                return Err(Error::invalid_parameter(format!(
                    "host {} interface {} is mgmt but promiscuous",
                    display_name(host),
                    str_field(network, "interface").unwrap_or("")
                )));
            }
            mgmt_interface_set = true;
        }
    }
    if !mgmt_interface_set {
        return Err(Error::invalid_parameter(format!(
            "host {} has no mgmt interface",
            display_name(host)
        )));
    }
    Ok(())
}

/// Cluster analog of host editability, used when host deletion touches the
/// clusters the host belongs to. Always raises on violation.
pub fn is_cluster_editable(
    cluster: &Record,
    state: &Record,
    user: &UserContext,
    reinstall_distributed_system_set: bool,
) -> Result<()> {
    if reinstall_distributed_system_set {
        if str_field(state, "state") == Some(StateValue::Installing.as_str()) {
            return Err(Error::forbidden(format!(
                "cluster {} is not editable",
                display_name(cluster)
            )));
        }
    } else if !bool_field(cluster, "reinstall_distributed_system") {
        return Err(Error::forbidden(format!(
            "cluster {} is not editable",
            display_name(cluster)
        )));
    }
    if !user.is_admin && i64_field(cluster, "creator_id") != Some(user.id) {
        return Err(Error::forbidden(format!(
            "cluster {} is not editable",
            display_name(cluster)
        )));
    }
    Ok(())
}
