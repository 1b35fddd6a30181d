//! Statement routing behavior observable through the proxy.

use crate::{get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;

#[test]
fn plain_select_is_forwarded() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let one: Option<u64> = conn.query_first("SELECT 1").expect("SELECT 1 should succeed");
    assert_eq!(one, Some(1));
}

#[test]
fn node_hint_is_honored() {
    skip_if_not_enabled!();

    // the comment survives routing and is a plain comment to the backend
    let mut conn = get_proxy_config().conn();
    let one: Option<u64> = conn
        .query_first("/*node1*/ SELECT 1")
        .expect("hinted SELECT should succeed");
    assert_eq!(one, Some(1));
}

#[test]
fn unknown_node_hint_falls_back_to_default() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let one: Option<u64> = conn
        .query_first("/*no_such_node*/ SELECT 1")
        .expect("SELECT with unknown hint should fall back");
    assert_eq!(one, Some(1));
}

#[test]
fn session_variable_sets_are_acknowledged_locally() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    conn.query_drop("SET autocommit=1").expect("SET autocommit");
    conn.query_drop("SET NAMES utf8").expect("SET NAMES");
    conn.query_drop("SET character_set_results = utf8")
        .expect("SET character_set_results");

    // the connection must still be usable afterwards
    let one: Option<u64> = conn.query_first("SELECT 1").expect("SELECT after SETs");
    assert_eq!(one, Some(1));
}

#[test]
fn set_transaction_is_swallowed() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    conn.query_drop("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .expect("SET TRANSACTION should be acknowledged");
    conn.query_drop("SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED")
        .expect("SET SESSION TRANSACTION should be acknowledged");
}

#[test]
fn read_spread_over_replicas() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let mut server_ids = std::collections::HashSet::new();
    for _ in 0..10 {
        let id: Option<u64> = conn
            .query_first("SELECT @@server_id")
            .expect("SELECT @@server_id should succeed");
        if let Some(id) = id {
            server_ids.insert(id);
        }
    }

    if server_ids.len() > 1 {
        eprintln!("read/write split observed across {} servers", server_ids.len());
    } else {
        eprintln!("single server answered (expected without replicas)");
    }
}
