use std::sync::Arc;
use std::time::Duration;

use atlantis_commons::Serializer;
use atlantis_containers::{
    ContainerManager,
    ManagerConfig,
    ProxySupervisor,
};
use atlantis_supervisor::rpc::SupervisorContext;
use atlantis_supervisor::tracker::{
    spawn_maintenance_checker,
    TaskTracker,
};
use atlantis_supervisor::{
    config,
    healthz,
    server,
};
use clap::Parser;
use log::{
    error,
    info,
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = config::Opts::parse();
    let config = config::load(&opts);

    info!(
        "Initializing Atlantis Supervisor [{}] [{}]",
        config.region, config.zone
    );

    let manager = ContainerManager::init(ManagerConfig {
        registry: config.registry_host.clone(),
        save_dir: config.save_dir.clone(),
        num_containers: config.num_containers,
        num_secondary: config.num_secondary,
        min_port: config.min_port,
        cpu_shares: config.cpu_shares,
        memory_limit: config.memory_limit,
        enable_netsec: config.enable_netsec,
    })
    .await?;

    let serializer = Serializer::new(&config.save_dir).await?;
    let proxy = Arc::new(ProxySupervisor::restore(manager.runtime(), serializer).await);

    let tracker = TaskTracker::new();
    spawn_maintenance_checker(
        tracker.clone(),
        config.maintenance_file.clone(),
        Duration::from_secs(config.maintenance_check_seconds),
    );

    let ctx = Arc::new(SupervisorContext {
        manager,
        proxy,
        tracker: tracker.clone(),
        region: config.region.clone(),
        zone: config.zone.clone(),
    });

    let healthz_ctx = ctx.clone();
    let healthz_port = config.healthz_port;
    tokio::spawn(async move {
        if let Err(err) = healthz::serve(healthz_port, healthz_ctx).await {
            error!("healthz server failed: {err}");
        }
    });

    tokio::spawn(signal_listener(tracker));

    // A bind failure here surfaces as a non-zero exit; everything after a
    // successful bind reports through RPC replies instead.
    server::serve(&config.rpc_addr, ctx).await?;
    Ok(())
}

/// SIGTERM drains: stop accepting nothing (the RPC listener stays up), wait
/// for the tracker to go idle, then exit.
async fn signal_listener(tracker: TaskTracker) {
    #[cfg(unix)]
    {
        let Ok(mut sigterm) = signal::unix::signal(signal::unix::SignalKind::terminate())
        else {
            error!("could not install SIGTERM handler");
            return;
        };
        let _ = sigterm.recv().await;
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }

    info!("[SIGTERM] Gracefully shutting down...");
    while !tracker.idle() {
        info!("[SIGTERM] -> waiting for idle");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    std::process::exit(0);
}
