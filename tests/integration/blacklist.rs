//! Blacklist enforcement through a live proxy.
//!
//! Requires the proxy to be started with a blacklist file; point
//! JANUS_TEST_BLACKLISTED_SQL at a statement covered by it.

use crate::{get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;

#[test]
fn blacklisted_statement_is_rejected() {
    skip_if_not_enabled!();

    let Ok(sql) = std::env::var("JANUS_TEST_BLACKLISTED_SQL") else {
        eprintln!("skipping: set JANUS_TEST_BLACKLISTED_SQL to a blacklisted statement");
        return;
    };

    let mut conn = get_proxy_config().conn();
    let err = conn
        .query_drop(&sql)
        .expect_err("blacklisted statement must fail");
    let text = err.to_string();
    assert!(
        text.contains("sql in blacklist"),
        "unexpected error for blacklisted statement: {text}"
    );
}

#[test]
fn literal_variants_share_the_blacklist_entry() {
    skip_if_not_enabled!();

    let Ok(sql) = std::env::var("JANUS_TEST_BLACKLISTED_SQL") else {
        eprintln!("skipping: set JANUS_TEST_BLACKLISTED_SQL to a blacklisted statement");
        return;
    };

    // extra whitespace must not defeat the fingerprint
    let spaced = sql.replace(' ', "  ");
    let mut conn = get_proxy_config().conn();
    let err = conn
        .query_drop(&spaced)
        .expect_err("whitespace variant must fail too");
    assert!(err.to_string().contains("sql in blacklist"));
}
