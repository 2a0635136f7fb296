use std::env;
use std::sync::Arc;

use atlantis_commons::Serializer;
use atlantis_proxy::manager::{
    MultiProxy,
    DEFAULT_MAX_PENDING,
    DEFAULT_NUM_HANDLERS,
};
use atlantis_proxy::{
    api,
    ProxyError,
};
use log::info;
use tokio::signal;

const DEFAULT_SAVE_DIR: &str = "/etc/atlantis/proxy";
const DEFAULT_CONFIG_ADDR: &str = "0.0.0.0:8080";

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize_or(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    env_logger::init();

    let save_dir = env_or("PROXY_SAVE_DIR", DEFAULT_SAVE_DIR);
    let config_addr = env_or("PROXY_CONFIG_ADDR", DEFAULT_CONFIG_ADDR);
    let num_handlers = env_usize_or("PROXY_NUM_HANDLERS", DEFAULT_NUM_HANDLERS);
    let max_pending = env_usize_or("PROXY_MAX_PENDING", DEFAULT_MAX_PENDING);

    let serializer = Serializer::new(&save_dir).await?;
    let manager = Arc::new(MultiProxy::new(serializer, num_handlers, max_pending));
    manager.load().await?;

    let api_manager = manager.clone();
    tokio::select! {
        result = api::serve(api_manager, &config_addr) => result?,
        _ = shutdown_signal() => info!("shutdown signal received"),
    }

    manager.die_all().await;
    info!("proxy fleet drained, exiting");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        let _ = sigterm.recv().await;
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            } => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
