use std::path::PathBuf;
use std::time::Duration;

use atlantis_supervisor::monitor::{
    run_sweep,
    MonitorConfig,
};
use clap::Parser;

/// Sweeps every persisted container's monitoring checks and prints
/// Nagios-style result lines.
#[derive(Debug, Parser)]
#[command(name = "atlantis-monitor")]
struct Opts {
    /// file to get container information
    #[arg(short = 'f', long = "container-file")]
    container_file: Option<PathBuf>,

    /// directory containing the check scripts inside each container
    #[arg(short = 'd', long = "check-dir")]
    check_dir: Option<String>,

    /// user account to ssh into containers
    #[arg(short = 'u', long = "ssh-user")]
    ssh_user: Option<String>,

    /// file containing the SSH key for all containers
    #[arg(short = 'i', long = "ssh-identity")]
    ssh_identity: Option<String>,

    /// service name the sweep reports under
    #[arg(short = 'n', long = "check-name")]
    check_name: Option<String>,

    /// max number of seconds to wait for a single check to finish
    #[arg(short = 't', long = "timeout-seconds")]
    timeout_seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    let mut config = MonitorConfig::default();
    if let Some(container_file) = opts.container_file {
        config.container_file = container_file;
    }
    if let Some(check_dir) = opts.check_dir {
        config.check_dir = check_dir;
    }
    if let Some(ssh_user) = opts.ssh_user {
        config.ssh_user = ssh_user;
    }
    if let Some(ssh_identity) = opts.ssh_identity {
        config.ssh_identity = ssh_identity;
    }
    if let Some(check_name) = opts.check_name {
        config.check_name = check_name;
    }
    if let Some(seconds) = opts.timeout_seconds {
        config.timeout = Duration::from_secs(seconds);
    }

    for result in run_sweep(&config).await? {
        println!("{result}");
    }
    Ok(())
}
