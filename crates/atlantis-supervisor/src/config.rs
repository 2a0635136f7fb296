use std::path::PathBuf;

use clap::Parser;
use log::warn;
use serde::Deserialize;

pub const RPC_VERSION: &str = "1.0.0";

const DEFAULT_CONFIG_FILE: &str = "/etc/atlantis/supervisor/server.toml";

/// Effective server configuration: built-in defaults, overlaid by the TOML
/// config file, overlaid by command-line flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub save_dir: PathBuf,
    pub num_containers: u16,
    pub num_secondary: u16,
    pub cpu_shares: u32,
    pub memory_limit: u32,
    pub min_port: u16,
    pub rpc_addr: String,
    pub healthz_port: u16,
    pub registry_host: String,
    pub region: String,
    pub zone: String,
    pub maintenance_file: PathBuf,
    pub maintenance_check_seconds: u64,
    pub enable_netsec: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("/etc/atlantis/supervisor/save"),
            num_containers: 100,
            num_secondary: 5,
            cpu_shares: 100,
            memory_limit: 4096,
            min_port: 61000,
            rpc_addr: "0.0.0.0:1337".to_string(),
            healthz_port: 1338,
            registry_host: "localhost".to_string(),
            region: "dev".to_string(),
            zone: "dev".to_string(),
            maintenance_file: PathBuf::from("/etc/atlantis/supervisor/maint"),
            maintenance_check_seconds: 5,
            enable_netsec: false,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "atlantis-supervisor", about = "Atlantis node supervisor")]
pub struct Opts {
    /// the config file to use
    #[arg(long = "config-file", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// the directory to save to
    #[arg(long = "save")]
    pub save_dir: Option<PathBuf>,

    /// the # of available containers
    #[arg(long = "containers")]
    pub num_containers: Option<u16>,

    /// the # of secondary ports
    #[arg(long = "secondary")]
    pub num_secondary: Option<u16>,

    /// the total # of CPU shares available
    #[arg(long = "cpu-shares")]
    pub cpu_shares: Option<u32>,

    /// the total MB of memory available
    #[arg(long = "memory-limit")]
    pub memory_limit: Option<u32>,

    /// the minimum port number to use
    #[arg(long = "min-port")]
    pub min_port: Option<u16>,

    /// the RPC listen addr
    #[arg(long = "rpc")]
    pub rpc_addr: Option<String>,

    /// the healthz listen port
    #[arg(long = "healthz-port")]
    pub healthz_port: Option<u16>,

    /// the registry host to talk to
    #[arg(long = "registry")]
    pub registry_host: Option<String>,

    /// the region this supervisor is in
    #[arg(long = "region")]
    pub region: Option<String>,

    /// the availability zone this supervisor is in
    #[arg(long = "zone")]
    pub zone: Option<String>,

    /// the maintenance file to check
    #[arg(long = "maintenance-file")]
    pub maintenance_file: Option<PathBuf>,

    /// the interval (seconds) to check the maintenance file
    #[arg(long = "maintenance-check-seconds")]
    pub maintenance_check_seconds: Option<u64>,

    /// enforce per-container egress policies
    #[arg(long = "enable-netsec")]
    pub enable_netsec: bool,
}

pub fn load(opts: &Opts) -> ServerConfig {
    let mut config = ServerConfig::default();
    match std::fs::read_to_string(&opts.config) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(parsed) => config = parsed,
            // defaults are reasonable, keep going
            Err(err) => warn!("could not parse {}: {err}", opts.config.display()),
        },
        Err(_) => warn!(
            "no config file at {}, using defaults",
            opts.config.display()
        ),
    }
    overlay(&mut config, opts);
    config
}

fn overlay(config: &mut ServerConfig, opts: &Opts) {
    if let Some(save_dir) = &opts.save_dir {
        config.save_dir = save_dir.clone();
    }
    if let Some(num_containers) = opts.num_containers {
        config.num_containers = num_containers;
    }
    if let Some(num_secondary) = opts.num_secondary {
        config.num_secondary = num_secondary;
    }
    if let Some(cpu_shares) = opts.cpu_shares {
        config.cpu_shares = cpu_shares;
    }
    if let Some(memory_limit) = opts.memory_limit {
        config.memory_limit = memory_limit;
    }
    if let Some(min_port) = opts.min_port {
        config.min_port = min_port;
    }
    if let Some(rpc_addr) = &opts.rpc_addr {
        config.rpc_addr = rpc_addr.clone();
    }
    if let Some(healthz_port) = opts.healthz_port {
        config.healthz_port = healthz_port;
    }
    if let Some(registry_host) = &opts.registry_host {
        config.registry_host = registry_host.clone();
    }
    if let Some(region) = &opts.region {
        config.region = region.clone();
    }
    if let Some(zone) = &opts.zone {
        config.zone = zone.clone();
    }
    if let Some(maintenance_file) = &opts.maintenance_file {
        config.maintenance_file = maintenance_file.clone();
    }
    if let Some(seconds) = opts.maintenance_check_seconds {
        config.maintenance_check_seconds = seconds;
    }
    if opts.enable_netsec {
        config.enable_netsec = true;
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn partial_toml_overlays_defaults() {
        let parsed: ServerConfig =
            toml::from_str("num_containers = 2\nregion = \"us-east-1\"").unwrap();
        assert_eq!(parsed.num_containers, 2);
        assert_eq!(parsed.region, "us-east-1");
        assert_eq!(parsed.min_port, 61000);
        assert_eq!(parsed.cpu_shares, 100);
    }

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server.toml");
        std::fs::write(&file, "region = \"from-file\"\nmin_port = 50000").unwrap();

        let opts = Opts::parse_from([
            "atlantis-supervisor",
            "--config-file",
            file.to_str().unwrap(),
            "--region",
            "from-flag",
            "--containers",
            "7",
        ]);
        let config = load(&opts);
        assert_eq!(config.region, "from-flag");
        assert_eq!(config.num_containers, 7);
        assert_eq!(config.min_port, 50000);
    }
}
