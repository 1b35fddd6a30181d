//! Transaction semantics through a live proxy.

use crate::{get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;

const TEST_TABLE: &str = "it_janus_tx";

fn setup_table(conn: &mut mysql::Conn) {
    conn.query_drop(format!(
        "CREATE TABLE IF NOT EXISTS {TEST_TABLE} (id INT PRIMARY KEY, v INT)"
    ))
    .expect("create test table");
    conn.query_drop(format!("DELETE FROM {TEST_TABLE}"))
        .expect("clear test table");
}

#[test]
fn commit_makes_writes_visible() {
    skip_if_not_enabled!();

    let config = get_proxy_config();
    let mut conn = config.conn();
    setup_table(&mut conn);

    conn.query_drop("BEGIN").expect("BEGIN");
    conn.query_drop(format!("INSERT INTO {TEST_TABLE} (id, v) VALUES (1, 10)"))
        .expect("INSERT inside transaction");
    conn.query_drop("COMMIT").expect("COMMIT");

    let mut other = config.conn();
    let v: Option<i64> = other
        .query_first(format!("SELECT v FROM {TEST_TABLE} WHERE id=1"))
        .expect("SELECT after commit");
    assert_eq!(v, Some(10));
}

#[test]
fn rollback_discards_writes() {
    skip_if_not_enabled!();

    let config = get_proxy_config();
    let mut conn = config.conn();
    setup_table(&mut conn);

    conn.query_drop("BEGIN").expect("BEGIN");
    conn.query_drop(format!("INSERT INTO {TEST_TABLE} (id, v) VALUES (2, 20)"))
        .expect("INSERT inside transaction");
    conn.query_drop("ROLLBACK").expect("ROLLBACK");

    let count: Option<i64> = conn
        .query_first(format!("SELECT COUNT(*) FROM {TEST_TABLE} WHERE id=2"))
        .expect("SELECT after rollback");
    assert_eq!(count, Some(0));
}

#[test]
fn reads_inside_transaction_see_own_writes() {
    skip_if_not_enabled!();

    let config = get_proxy_config();
    let mut conn = config.conn();
    setup_table(&mut conn);

    conn.query_drop("BEGIN").expect("BEGIN");
    conn.query_drop(format!("INSERT INTO {TEST_TABLE} (id, v) VALUES (3, 30)"))
        .expect("INSERT inside transaction");

    // in-transaction reads run on the same master connection
    let v: Option<i64> = conn
        .query_first(format!("SELECT v FROM {TEST_TABLE} WHERE id=3"))
        .expect("SELECT inside transaction");
    assert_eq!(v, Some(30));

    conn.query_drop("ROLLBACK").expect("ROLLBACK");
}

#[test]
fn transaction_must_not_span_nodes() {
    skip_if_not_enabled!();

    let Ok(second_node) = std::env::var("JANUS_TEST_SECOND_NODE") else {
        eprintln!("skipping: set JANUS_TEST_SECOND_NODE to a second configured node name");
        return;
    };

    let config = get_proxy_config();
    let mut conn = config.conn();
    setup_table(&mut conn);

    conn.query_drop("BEGIN").expect("BEGIN");
    conn.query_drop(format!("INSERT INTO {TEST_TABLE} (id, v) VALUES (4, 40)"))
        .expect("first statement pins the default node");

    let err = conn
        .query_drop(format!("/*{second_node}*/ SELECT 1"))
        .expect_err("statement hinted at another node must fail");
    assert!(
        err.to_string().contains("transaction spans multiple nodes"),
        "unexpected error: {err}"
    );

    // the transaction itself stays open and can be rolled back
    conn.query_drop("ROLLBACK").expect("ROLLBACK");
}
