//! Integration test entry point.
//!
//! These tests drive a running janus instance over the MySQL protocol.
//! Start the proxy with a backend behind it, then run:
//!
//!   JANUS_RUN_INTEGRATION_TESTS=1 cargo test --test integration

mod blacklist;
mod routing;
mod transaction;

use std::env;

/// Check whether integration tests should run.
pub fn should_run_integration_tests() -> bool {
    env::var("JANUS_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip the current test unless integration testing is enabled.
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !$crate::should_run_integration_tests() {
            eprintln!("skipping: set JANUS_RUN_INTEGRATION_TESTS=1 to run");
            return;
        }
    };
}

/// Proxy endpoint under test, from the environment.
pub fn get_proxy_config() -> ProxyTestConfig {
    ProxyTestConfig {
        host: env::var("JANUS_TEST_PROXY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("JANUS_TEST_PROXY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(4000),
        user: env::var("JANUS_TEST_PROXY_USER").unwrap_or_else(|_| "janus".to_string()),
        password: env::var("JANUS_TEST_PROXY_PASS").unwrap_or_else(|_| "janus_pass".to_string()),
        database: env::var("JANUS_TEST_PROXY_DB").ok(),
    }
}

#[derive(Debug, Clone)]
pub struct ProxyTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

impl ProxyTestConfig {
    pub fn url(&self) -> String {
        let db = self.database.as_deref().unwrap_or("");
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, db
        )
    }

    pub fn conn(&self) -> mysql::Conn {
        let opts = mysql::Opts::from_url(&self.url()).expect("proxy url should parse");
        mysql::Conn::new(opts).expect("should connect to janus")
    }
}
