use serde::{
    Deserialize,
    Serialize,
};

use crate::models::manifest::Manifest;

/// A slot-bound application container. The supervisor hands out one of these
/// per reserved slot; `runtime_id` and `ip` stay empty until a deploy
/// succeeds and are stable until teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    #[serde(default)]
    pub runtime_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub host: String,
    pub primary_port: u16,
    pub ssh_port: u16,
    pub secondary_ports: Vec<u16>,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub env: String,
    pub manifest: Manifest,
}

impl Container {
    /// The id fragment after the last `-`, used to derive a host-side
    /// veth-pair name that can be looked up later.
    pub fn random_suffix(&self) -> &str {
        match self.id.rfind('-') {
            Some(idx) => &self.id[idx + 1..],
            None => &self.id,
        }
    }

    pub fn veth_name(&self) -> String {
        format!("veth{}", self.random_suffix())
    }

    /// Every host port owned by this container, in a stable order.
    pub fn all_ports(&self) -> Vec<u16> {
        let mut ports = vec![self.primary_port, self.ssh_port];
        ports.extend(&self.secondary_ports);
        ports
    }
}

/// The singleton reverse-proxy container. At most one instance is live on a
/// host; updates deploy the replacement before retiring the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyContainer {
    pub id: String,
    #[serde(default)]
    pub runtime_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub host: String,
    pub config_port: u16,
    pub ssh_port: u16,
    pub min_expose_port: u16,
    pub max_expose_port: u16,
    pub app: String,
    pub sha: String,
    pub num_handlers: usize,
    pub max_pending: usize,
    pub cpu_shares: u32,
    pub memory_limit: u32,
    pub veth_name: String,
}

/// A total/used/free triple for one host resource pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub total: u32,
    pub used: u32,
    pub free: u32,
}

impl ResourceStats {
    pub fn new(total: u32, used: u32) -> Self {
        Self {
            total,
            used,
            free: total - used,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn container(id: &str) -> Container {
        Container {
            id: id.to_string(),
            runtime_id: String::new(),
            ip: String::new(),
            host: String::new(),
            primary_port: 61000,
            ssh_port: 61002,
            secondary_ports: vec![61004, 61006],
            app: String::new(),
            sha: String::new(),
            env: String::new(),
            manifest: Manifest {
                name: "app".to_string(),
                description: String::new(),
                instances: 1,
                cpu_shares: 1,
                memory_limit: 1,
                app_type: String::new(),
                java_type: String::new(),
                run_commands: vec![],
                deps: HashMap::new(),
            },
        }
    }

    #[test]
    fn veth_name_uses_suffix_after_last_dash() {
        let cont = container("myapp-dev-a1b2c3");
        assert_eq!(cont.random_suffix(), "a1b2c3");
        assert_eq!(cont.veth_name(), "vetha1b2c3");

        let plain = container("nodash");
        assert_eq!(plain.veth_name(), "vethnodash");
    }

    #[test]
    fn all_ports_covers_primary_ssh_and_secondaries() {
        let cont = container("x-1");
        assert_eq!(cont.all_ports(), vec![61000, 61002, 61004, 61006]);
    }

    #[test]
    fn resource_stats_conserve_total() {
        let stats = ResourceStats::new(100, 37);
        assert_eq!(stats.used + stats.free, stats.total);
    }
}
