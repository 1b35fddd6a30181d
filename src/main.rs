mod blacklist;
mod config;
mod pool;
mod protocol;
mod proxy;
mod router;
mod session;
mod sql;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use config::Config;
use proxy::ProxyState;
use session::Session;

/// Global connection counter for session ids.
static CONNECTION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// How long shutdown waits for active sessions to drain.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_configuration()?;
    let proxy = Arc::new(ProxyState::from_config(&config)?);

    info!(nodes = ?proxy.node_names(), "Nodes configured");

    let listener = TcpListener::bind(proxy.addr()).await?;
    info!(addr = %proxy.addr(), "janus MySQL proxy listening");

    spawn_blacklist_reloader(proxy.clone());

    let mut sessions: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping accept loop");
                break;
            }

            accept_result = listener.accept() => {
                let (stream, peer_addr) = match accept_result {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let session_id = CONNECTION_COUNTER.fetch_add(1, Ordering::SeqCst);
                let proxy = proxy.clone();

                info!(session_id = session_id, peer = %peer_addr, "New connection");

                sessions.spawn(async move {
                    let session = Session::new(session_id, peer_addr.to_string(), proxy);
                    if let Err(e) = session.run(stream).await {
                        warn!(session_id = session_id, error = %e, "Session ended with error");
                    } else {
                        info!(session_id = session_id, "Session ended");
                    }
                });
            }
        }
    }

    drain_sessions(sessions).await;
    info!("janus shutdown complete");
    Ok(())
}

async fn drain_sessions(mut sessions: JoinSet<()>) {
    let active = sessions.len();
    if active == 0 {
        return;
    }

    info!(
        active_sessions = active,
        timeout_secs = GRACEFUL_SHUTDOWN_TIMEOUT.as_secs(),
        "Waiting for active sessions to complete"
    );

    let deadline = tokio::time::Instant::now() + GRACEFUL_SHUTDOWN_TIMEOUT;
    loop {
        if sessions.is_empty() {
            info!("All sessions completed gracefully");
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                warn!(
                    remaining_sessions = sessions.len(),
                    "Graceful shutdown timeout, aborting remaining sessions"
                );
                sessions.abort_all();
                return;
            }

            Some(result) = sessions.join_next() => {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        error!(error = %e, "Session task panicked");
                    }
                }
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// SIGHUP re-reads the blacklist file without a restart.
fn spawn_blacklist_reloader(proxy: Arc<ProxyState>) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let mut hup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGHUP handler");
                return;
            }
        };
        while hup.recv().await.is_some() {
            info!("SIGHUP received, reloading blacklist");
            proxy.reload_blacklist();
        }
    });

    #[cfg(not(unix))]
    let _ = proxy;
}

fn load_configuration() -> anyhow::Result<Config> {
    if let Some(path) = std::env::args().nth(1) {
        let config = config::load_config(&path)?;
        info!(path = %path, "Loaded configuration");
        return Ok(config);
    }

    let config_paths = ["janus.toml", "etc/janus.toml"];
    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return Ok(config);
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    anyhow::bail!("no usable config file; pass a path or provide janus.toml")
}
