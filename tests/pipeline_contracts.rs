//! Pipeline contract tests
//!
//! Keyword-set validation, rename mapping, projection stability, response
//! record filters, filter-operator semantics over the listing surface, and
//! transactional rollback, all through the public operation surface.

use std::sync::Arc;

use serde_json::{json, Value};

use rigger::lifecycle::HostService;
use rigger::model::EntityKind;
use rigger::pipeline::{Permission, UserContext};
use rigger::query::{Filters, QueryExecutor};
use rigger::store::MemoryStore;
use rigger::tasks::RecordingDispatcher;

fn service() -> (HostService, QueryExecutor, UserContext) {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    (
        HostService::new(store.clone(), dispatcher),
        QueryExecutor::new(store),
        UserContext::admin(1, "root@local"),
    )
}

fn args(value: Value) -> Filters {
    value.as_object().cloned().unwrap()
}

fn add_host(service: &HostService, user: &UserContext, name: &str, os_id: i64, os: &str) -> i64 {
    let host = service
        .add_host(user, name, args(json!({"os_id": os_id, "os_name": os})))
        .unwrap();
    host["id"].as_i64().unwrap()
}

fn listed_names(listed: &Value) -> Vec<&str> {
    listed
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["name"].as_str().unwrap())
        .collect()
}

#[test]
fn test_unsupported_keywords_rejected_with_exact_keys() {
    let (service, _executor, user) = service();
    let err = service
        .list_hosts(&user, args(json!({"flavor": "xl", "zone": "b", "name": "a"})))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    let message = err.to_string();
    assert!(message.contains("flavor"));
    assert!(message.contains("zone"));
    assert!(!message.contains("\"name\""));
}

#[test]
fn test_missing_required_keyword_listed() {
    let (service, _executor, user) = service();
    let host_id = add_host(&service, &user, "a", 1, "CentOS");
    let err = service
        .update_host_config(&user, host_id, Filters::new())
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    assert!(err.to_string().contains("put_os_config"));
}

#[test]
fn test_ignored_keywords_are_dropped_silently() {
    let (service, _executor, user) = service();
    let host_id = add_host(&service, &user, "a", 1, "CentOS");
    let updated = service
        .update_host(
            &user,
            host_id,
            args(json!({"name": "b", "id": 999, "updated_at": "bogus"})),
        )
        .unwrap();
    assert_eq!(updated["name"], json!("b"));
    // the ignored id never reached the executor
    assert_eq!(updated["id"], json!(host_id));
}

#[test]
fn test_caller_facing_rename_reaches_internal_slot() {
    let (service, executor, user) = service();
    let host_id = add_host(&service, &user, "a", 1, "CentOS");
    service
        .update_host_config(
            &user,
            host_id,
            args(json!({"os_config": {"general": {"lang": "EN"}}})),
        )
        .unwrap();

    let stored = executor.get_by_id(EntityKind::Host, host_id).unwrap();
    assert_eq!(stored["os_config"], json!({"general": {"lang": "EN"}}));
    // the caller-facing name is not a stored column value
    assert!(stored.get("put_os_config").is_none());
}

#[test]
fn test_projection_allow_list_and_idempotence() {
    let (service, _executor, user) = service();
    let host_id = add_host(&service, &user, "a", 1, "CentOS");
    service
        .update_host_config(&user, host_id, args(json!({"os_config": {"x": 1}})))
        .unwrap();

    let first = service.get_host(&user, host_id, true).unwrap();
    // os_config is not part of the host projection
    assert!(first.get("os_config").is_none());
    assert!(first.get("creator_id").is_none());

    let second = service.get_host(&user, host_id, true).unwrap();
    assert_eq!(first, second);

    // the config view carries os_config but no name
    let config = service.get_host_config(&user, host_id).unwrap();
    assert_eq!(config["os_config"], json!({"x": 1}));
    assert!(config.get("name").is_none());
}

#[test]
fn test_permission_denied_for_unauthorized_caller() {
    let (service, _executor, user) = service();
    add_host(&service, &user, "a", 1, "CentOS");

    let nobody = UserContext::new(5, "nobody@local");
    let err = service.list_hosts(&nobody, Filters::new()).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let reader = UserContext::new(6, "reader@local").grant(Permission::ListHosts);
    assert!(service.list_hosts(&reader, Filters::new()).is_ok());
}

#[test]
fn test_filter_operator_semantics_on_listing() {
    let (service, _executor, user) = service();
    add_host(&service, &user, "a", 1, "CentOS");
    add_host(&service, &user, "b", 2, "CentOS");
    add_host(&service, &user, "c", 3, "Ubuntu");
    add_host(&service, &user, "d", 4, "Ubuntu");

    let lt = service
        .list_hosts(&user, args(json!({"os_id": {"lt": 3}})))
        .unwrap();
    assert_eq!(listed_names(&lt), vec!["a", "b"]);

    let gt = service
        .list_hosts(&user, args(json!({"os_id": {"gt": 3}})))
        .unwrap();
    assert_eq!(listed_names(&gt), vec!["d"]);

    let between = service
        .list_hosts(&user, args(json!({"os_id": {"between": [2, 3]}})))
        .unwrap();
    assert_eq!(listed_names(&between), vec!["b", "c"]);

    let open_lower = service
        .list_hosts(&user, args(json!({"os_id": {"between": [null, 2]}})))
        .unwrap();
    assert_eq!(listed_names(&open_lower), vec!["a", "b"]);
}

#[test]
fn test_list_filters_scalar_list_and_empty_list() {
    let (service, _executor, user) = service();
    add_host(&service, &user, "a", 1, "CentOS");
    add_host(&service, &user, "b", 2, "CentOS");

    let scalar = service
        .list_hosts(&user, args(json!({"name": "a"})))
        .unwrap();
    let single = service
        .list_hosts(&user, args(json!({"name": ["a"]})))
        .unwrap();
    assert_eq!(scalar, single);

    let membership = service
        .list_hosts(&user, args(json!({"name": ["a", "b", "zz"]})))
        .unwrap();
    assert_eq!(listed_names(&membership), vec!["a", "b"]);

    // an empty list contributes no constraint
    let unconstrained = service.list_hosts(&user, args(json!({"name": []}))).unwrap();
    assert_eq!(listed_names(&unconstrained), vec!["a", "b"]);
}

#[test]
fn test_response_record_filters_on_projected_values() {
    let (service, _executor, user) = service();
    add_host(&service, &user, "a", 1, "CentOS");
    add_host(&service, &user, "b", 2, "Ubuntu");
    add_host(&service, &user, "c", 3, "CentOS");

    let filtered = service
        .list_hosts(&user, args(json!({"os_name": {"resp_eq": "CentOS"}})))
        .unwrap();
    assert_eq!(listed_names(&filtered), vec!["a", "c"]);

    let matched = service
        .list_hosts(&user, args(json!({"os_name": {"resp_match": "Ubu.*"}})))
        .unwrap();
    assert_eq!(listed_names(&matched), vec!["b"]);

    let bounded = service
        .list_hosts(&user, args(json!({"os_id": {"resp_ge": 2}})))
        .unwrap();
    assert_eq!(listed_names(&bounded), vec!["b", "c"]);
}

#[test]
fn test_add_duplicate_host_name_raises() {
    let (service, _executor, user) = service();
    add_host(&service, &user, "a", 1, "CentOS");
    let err = service.add_host(&user, "a", Filters::new()).unwrap_err();
    assert_eq!(err.code(), "DUPLICATED_RECORD");
}

#[test]
fn test_add_existing_log_history_keeps_attributes() {
    let (service, _executor, user) = service();
    let host_id = add_host(&service, &user, "a", 1, "CentOS");
    service
        .add_host_log_history(
            &user,
            host_id,
            false,
            "install.log",
            args(json!({"position": 10})),
        )
        .unwrap();

    // same key, fail_on_existing=false: the existing record comes back
    // untouched by the new attributes
    let again = service
        .add_host_log_history(
            &user,
            host_id,
            false,
            "install.log",
            args(json!({"position": 99})),
        )
        .unwrap();
    assert_eq!(again["position"], json!(10));

    let err = service
        .add_host_log_history(&user, host_id, true, "install.log", Filters::new())
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATED_RECORD");
}

#[test]
fn test_bulk_update_rolls_back_wholesale_on_error() {
    let (service, _executor, user) = service();
    let host_id = add_host(&service, &user, "a", 1, "CentOS");

    let err = service
        .update_hosts(
            &user,
            vec![
                args(json!({"host_id": host_id, "name": "renamed"})),
                args(json!({"host_id": 9999, "name": "ghost"})),
            ],
        )
        .unwrap_err();
    assert_eq!(err.code(), "RECORD_NOT_EXISTS");

    // the first entry's successful write was rolled back with the scope
    let host = service.get_host(&user, host_id, true).unwrap();
    assert_eq!(host["name"], json!("a"));
}

#[test]
fn test_invalid_input_field_rejected_before_write() {
    let (service, executor, user) = service();
    let host_id = add_host(&service, &user, "a", 1, "CentOS");

    let err = service
        .add_host_network(
            &user,
            host_id,
            true,
            args(json!({"interface": "eth0", "ip": "999.0.0.1", "subnet_id": 1})),
        )
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    assert!(executor
        .list(EntityKind::HostNetwork, &Filters::new(), &[])
        .unwrap()
        .is_empty());
}

#[test]
fn test_update_host_state_validates_fields() {
    let (service, _executor, user) = service();
    let host_id = add_host(&service, &user, "a", 1, "CentOS");

    let err = service
        .update_host_state(&user, host_id, args(json!({"state": "DONE"})))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");

    let err = service
        .update_host_state(&user, host_id, args(json!({"percentage": 180})))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");

    let updated = service
        .update_host_state(
            &user,
            host_id,
            args(json!({"state": "INSTALLING", "percentage": 40, "message": "laying down os"})),
        )
        .unwrap();
    assert_eq!(updated["state"], json!("INSTALLING"));
    assert_eq!(updated["percentage"], json!(40));
    // state projection never leaks the host_id foreign key
    assert!(updated.get("host_id").is_none());
}
