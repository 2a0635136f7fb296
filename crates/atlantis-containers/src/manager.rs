use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use atlantis_commons::models::rpc::Status;
use atlantis_commons::utils::{
    codec,
    paths,
};
use atlantis_commons::{
    Container,
    Manifest,
    ResourceStats,
    Serializer,
    SupervisorError,
};
use atlantis_netsec::NetworkSecurity;
use log::{
    error,
    info,
    warn,
};
use serde_json::json;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::{
    mpsc,
    oneshot,
};

use crate::runtime::{
    pretending,
    ContainerRuntime,
};

pub const CONTAINERS_FILE: &str = "containers";
pub const PORTS_FILE: &str = "ports";

const REQUEST_QUEUE_DEPTH: usize = 64;
const LOGSYNC_DIR: &str = "/opt/atlantis/logsync";

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub registry: String,
    pub save_dir: PathBuf,
    pub num_containers: u16,
    pub num_secondary: u16,
    pub min_port: u16,
    pub cpu_shares: u32,
    pub memory_limit: u32,
    pub enable_netsec: bool,
}

enum ManagerRequest {
    Reserve {
        id: String,
        manifest: Manifest,
        reply: oneshot::Sender<Result<Container, SupervisorError>>,
    },
    CompleteDeploy {
        id: String,
        host: String,
        app: String,
        sha: String,
        env: String,
        runtime_id: String,
        ip: String,
        reply: oneshot::Sender<Result<Container, SupervisorError>>,
    },
    Teardown {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Option<Container>>,
    },
    List {
        reply: oneshot::Sender<(HashMap<String, Container>, Vec<u16>)>,
    },
    Nums {
        reply: oneshot::Sender<(ResourceStats, ResourceStats, ResourceStats)>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The single-writer interior of the container manager. Only the loop task
/// ever touches the map, the slot pool, or the counters, so every invariant
/// is enforced by straight-line code.
pub struct ContainerManager {
    config: ManagerConfig,
    containers: HashMap<String, Container>,
    ports: Vec<u16>,
    used_cpu: u32,
    used_memory: u32,
    serializer: Serializer,
    runtime: Arc<ContainerRuntime>,
    netsec: Arc<NetworkSecurity>,
}

/// Cheap, cloneable front of the manager. Requests are serialized through
/// the loop; deploys run their runtime work out here so `list` and `nums`
/// stay responsive during an image pull.
#[derive(Clone, Debug)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerRequest>,
    config: Arc<ManagerConfig>,
    runtime: Arc<ContainerRuntime>,
    netsec: Arc<NetworkSecurity>,
}

impl ContainerManager {
    /// Validates the configuration, restores persisted state, and spawns
    /// the manager loop. Nothing is written to disk when the config is
    /// rejected.
    pub async fn init(config: ManagerConfig) -> Result<ManagerHandle, SupervisorError> {
        if config.num_containers == 0 {
            return Err(SupervisorError::ConfigInvalid(
                "NumContainers must be at least 1".to_string(),
            ));
        }
        let span = (config.num_secondary as u64 + 2) * config.num_containers as u64;
        if config.min_port as u64 + span - 1 > 65535 {
            return Err(SupervisorError::ConfigInvalid(
                "MinPort+(NumSecondaryPorts+2)*NumContainers-1 > 65535".to_string(),
            ));
        }
        if u32::from(config.num_containers) != config.cpu_shares {
            warn!("for maximum efficiency please set num_containers = cpu_shares");
        }

        let serializer = Serializer::new(&config.save_dir).await?;
        let runtime = Arc::new(ContainerRuntime::new(&config.registry)?);
        let netsec =
            Arc::new(NetworkSecurity::restore(serializer.clone(), config.enable_netsec).await);

        let containers: HashMap<String, Container> =
            match serializer.load(CONTAINERS_FILE).await {
                Ok(Some(containers)) => containers,
                Ok(None) => {
                    info!("using default container map");
                    HashMap::new()
                }
                Err(err) => {
                    error!("could not restore container map, starting empty: {err}");
                    HashMap::new()
                }
            };
        let ports: Vec<u16> = match serializer.load(PORTS_FILE).await {
            Ok(Some(ports)) => ports,
            Ok(None) => {
                info!("using default port list");
                (0..config.num_containers).collect()
            }
            Err(err) => {
                error!("could not restore port list, starting full: {err}");
                (0..config.num_containers).collect()
            }
        };
        let used_cpu = containers.values().map(|c| c.manifest.cpu_shares).sum();
        let used_memory = containers.values().map(|c| c.manifest.memory_limit).sum();

        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let manager = ContainerManager {
            config: config.clone(),
            containers,
            ports,
            used_cpu,
            used_memory,
            serializer,
            runtime: runtime.clone(),
            netsec: netsec.clone(),
        };
        tokio::spawn(manager.run(rx));

        Ok(ManagerHandle {
            tx,
            config: Arc::new(config),
            runtime,
            netsec,
        })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ManagerRequest>) {
        while let Some(request) = rx.recv().await {
            match request {
                ManagerRequest::Reserve {
                    id,
                    manifest,
                    reply,
                } => {
                    let _ = reply.send(self.reserve(id, manifest));
                }
                ManagerRequest::CompleteDeploy {
                    id,
                    host,
                    app,
                    sha,
                    env,
                    runtime_id,
                    ip,
                    reply,
                } => {
                    let result = self.complete_deploy(&id, host, app, sha, env, runtime_id, ip);
                    if result.is_ok() {
                        self.save().await;
                    }
                    let _ = reply.send(result);
                }
                ManagerRequest::Teardown { id, reply } => {
                    let _ = reply.send(self.teardown(&id).await);
                }
                ManagerRequest::Get { id, reply } => {
                    let _ = reply.send(self.containers.get(&id).cloned());
                }
                ManagerRequest::List { reply } => {
                    let _ = reply.send(self.list());
                }
                ManagerRequest::Nums { reply } => {
                    let _ = reply.send(self.nums());
                }
                ManagerRequest::Shutdown { reply } => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    fn reserve(&mut self, id: String, manifest: Manifest) -> Result<Container, SupervisorError> {
        if self.containers.len() >= usize::from(self.config.num_containers) {
            return Err(SupervisorError::SlotsExhausted);
        }
        if self.containers.contains_key(&id) {
            return Err(SupervisorError::IdInUse(id));
        }
        if manifest.cpu_shares + self.used_cpu > self.config.cpu_shares {
            return Err(SupervisorError::CpuExhausted {
                requested: manifest.cpu_shares,
                available: self.config.cpu_shares - self.used_cpu,
            });
        }
        if manifest.memory_limit + self.used_memory > self.config.memory_limit {
            return Err(SupervisorError::MemoryExhausted {
                requested: manifest.memory_limit,
                available: self.config.memory_limit - self.used_memory,
            });
        }

        let slot = self.ports.remove(0);
        let num = self.config.num_containers;
        let secondary_ports = (0..self.config.num_secondary)
            .map(|k| self.config.min_port + num * (k + 2) + slot)
            .collect();
        let container = Container {
            id: id.clone(),
            runtime_id: String::new(),
            ip: String::new(),
            host: String::new(),
            primary_port: self.config.min_port + slot,
            ssh_port: self.config.min_port + num + slot,
            secondary_ports,
            app: String::new(),
            sha: String::new(),
            env: String::new(),
            manifest,
        };
        self.used_cpu += container.manifest.cpu_shares;
        self.used_memory += container.manifest.memory_limit;
        self.containers.insert(id, container.clone());
        // Reservation alone is not durable; the save happens once the
        // deployed container is actually alive.
        Ok(container)
    }

    #[allow(clippy::too_many_arguments)]
    fn complete_deploy(
        &mut self, id: &str, host: String, app: String, sha: String, env: String,
        runtime_id: String, ip: String,
    ) -> Result<Container, SupervisorError> {
        let Some(container) = self.containers.get_mut(id) else {
            return Err(SupervisorError::UnknownContainer(id.to_string()));
        };
        container.host = host;
        container.app = app;
        container.sha = sha;
        container.env = env;
        container.runtime_id = runtime_id;
        container.ip = ip;
        Ok(container.clone())
    }

    async fn teardown(&mut self, id: &str) -> bool {
        let Some(container) = self.containers.remove(id) else {
            return false;
        };
        if let Err(err) = self.netsec.remove_container_security(id).await {
            error!("could not remove netsec for {id}: {err}");
        }
        if let Err(err) = self.runtime.kill(id, &container.runtime_id).await {
            error!("could not kill runtime container for {id}: {err}");
        }
        remove_config_dir(id).await;
        self.ports.push(container.primary_port - self.config.min_port);
        self.used_cpu -= container.manifest.cpu_shares;
        self.used_memory -= container.manifest.memory_limit;
        self.save().await;
        // Log upload and the inventory resync are fire-and-forget; the loop
        // must not wait on them.
        tokio::spawn(post_teardown(id.to_string()));
        true
    }

    fn list(&self) -> (HashMap<String, Container>, Vec<u16>) {
        let ports = self
            .ports
            .iter()
            .map(|slot| self.config.min_port + slot)
            .collect();
        (self.containers.clone(), ports)
    }

    fn nums(&self) -> (ResourceStats, ResourceStats, ResourceStats) {
        (
            ResourceStats::new(
                u32::from(self.config.num_containers),
                self.containers.len() as u32,
            ),
            ResourceStats::new(self.config.cpu_shares, self.used_cpu),
            ResourceStats::new(self.config.memory_limit, self.used_memory),
        )
    }

    async fn save(&self) {
        if let Err(err) = self.serializer.save(CONTAINERS_FILE, &self.containers).await {
            error!("could not save container map: {err}");
        }
        if let Err(err) = self.serializer.save(PORTS_FILE, &self.ports).await {
            error!("could not save port list: {err}");
        }
    }
}

impl ManagerHandle {
    pub fn netsec(&self) -> Arc<NetworkSecurity> {
        self.netsec.clone()
    }

    pub fn runtime(&self) -> Arc<ContainerRuntime> {
        self.runtime.clone()
    }

    pub async fn reserve(
        &self, id: &str, manifest: Manifest,
    ) -> Result<Container, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerRequest::Reserve {
            id: id.to_string(),
            manifest,
            reply,
        })
        .await?;
        rx.await.map_err(loop_gone)?
    }

    /// Drives a reserved slot through pull, create, start, persist, and
    /// netsec registration. Every failure path releases the slot again via
    /// teardown, so a failed deploy leaks nothing.
    pub async fn deploy(
        &self, id: &str, host: &str, app: &str, sha: &str, env: &str,
    ) -> Result<Container, SupervisorError> {
        let Some(reserved) = self.get(id).await else {
            return Err(SupervisorError::UnknownContainer(id.to_string()));
        };
        match self.run_deploy(&reserved, host, app, sha, env).await {
            Ok(container) => Ok(container),
            Err(err) => {
                self.teardown(id).await;
                Err(err)
            }
        }
    }

    async fn run_deploy(
        &self, reserved: &Container, host: &str, app: &str, sha: &str, env: &str,
    ) -> Result<Container, SupervisorError> {
        info!("deploy {} with {} @ {}...", reserved.id, app, sha);
        self.runtime.pull("apps", app, sha).await?;

        let mut staged = reserved.clone();
        staged.host = host.to_string();
        staged.app = app.to_string();
        staged.sha = sha.to_string();
        staged.env = env.to_string();
        write_app_config(&staged).await?;

        let launched = match self.runtime.create_and_start_container(&staged).await {
            Ok(launched) => launched,
            Err(err) => {
                remove_config_dir(&staged.id).await;
                return Err(err);
            }
        };

        let (reply, rx) = oneshot::channel();
        self.send(ManagerRequest::CompleteDeploy {
            id: staged.id.clone(),
            host: staged.host.clone(),
            app: staged.app.clone(),
            sha: staged.sha.clone(),
            env: staged.env.clone(),
            runtime_id: launched.runtime_id.clone(),
            ip: launched.ip.clone(),
            reply,
        })
        .await?;
        let installed = match rx.await.map_err(loop_gone)? {
            Ok(installed) => installed,
            Err(err) => {
                // The record never made it into the map, so teardown will
                // not know the runtime id. Kill here.
                if let Err(kill_err) =
                    self.runtime.kill(&staged.id, &launched.runtime_id).await
                {
                    error!("could not kill {}: {kill_err}", staged.id);
                }
                remove_config_dir(&staged.id).await;
                return Err(err);
            }
        };

        if self.config.enable_netsec {
            self.netsec
                .add_container_security(
                    &staged.id,
                    launched.pid,
                    staged.manifest.security_groups(),
                )
                .await?;
        }
        Ok(installed)
    }

    /// Externally idempotent: tearing down an unknown id reports `false`
    /// rather than failing.
    pub async fn teardown(&self, id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .send(ManagerRequest::Teardown {
                id: id.to_string(),
                reply,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn get(&self, id: &str) -> Option<Container> {
        let (reply, rx) = oneshot::channel();
        if self
            .send(ManagerRequest::Get {
                id: id.to_string(),
                reply,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Deep copies: the caller gets its own map and the free ports as
    /// absolute port numbers.
    pub async fn list(&self) -> (HashMap<String, Container>, Vec<u16>) {
        let (reply, rx) = oneshot::channel();
        if self.send(ManagerRequest::List { reply }).await.is_err() {
            return (HashMap::new(), Vec::new());
        }
        rx.await.unwrap_or_default()
    }

    pub async fn nums(&self) -> (ResourceStats, ResourceStats, ResourceStats) {
        let (reply, rx) = oneshot::channel();
        let fallback = || {
            (
                ResourceStats::new(0, 0),
                ResourceStats::new(0, 0),
                ResourceStats::new(0, 0),
            )
        };
        if self.send(ManagerRequest::Nums { reply }).await.is_err() {
            return fallback();
        }
        rx.await.unwrap_or_else(|_| fallback())
    }

    /// Health classification over the three resource pools.
    pub async fn health_status(&self) -> (ResourceStats, ResourceStats, ResourceStats, Status) {
        let (containers, cpu, memory) = self.nums().await;
        let status = if containers.free == 0 || cpu.free == 0 || memory.free == 0 {
            Status::Full
        } else {
            Status::Ok
        };
        (containers, cpu, memory, status)
    }

    /// Stops the manager loop. Used by tests and graceful shutdown.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(ManagerRequest::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, request: ManagerRequest) -> Result<(), SupervisorError> {
        self.tx.send(request).await.map_err(|_| loop_gone_err())
    }
}

fn loop_gone<E>(_: E) -> SupervisorError {
    loop_gone_err()
}

fn loop_gone_err() -> SupervisorError {
    SupervisorError::Runtime("container manager loop is gone".to_string())
}

/// Creates the host log and config directories and writes the decrypted app
/// config where the container's bind mount will find it.
async fn write_app_config(container: &Container) -> Result<(), SupervisorError> {
    if pretending() {
        info!("[pretend] write app config for {}", container.id);
        return Ok(());
    }
    fs::create_dir_all(paths::host_log_dir(&container.id)).await?;
    fs::create_dir_all(paths::host_config_dir(&container.id)).await?;

    let mut dependencies = serde_json::Map::new();
    for (name, dep) in &container.manifest.deps {
        let payload = match codec::decode_payload(&dep.encrypted_data) {
            Ok(payload) => payload,
            Err(err) => {
                remove_config_dir(&container.id).await;
                return Err(err);
            }
        };
        dependencies.insert(name.clone(), payload);
    }
    let config = json!({
        "name": container.app,
        "container_id": container.id,
        "env": container.env,
        "http_port": container.primary_port,
        "dependencies": dependencies,
    });
    let encoded = serde_json::to_vec_pretty(&config)?;
    if let Err(err) = fs::write(paths::host_config_file(&container.id), encoded).await {
        remove_config_dir(&container.id).await;
        return Err(err.into());
    }
    Ok(())
}

async fn remove_config_dir(id: &str) {
    if pretending() {
        return;
    }
    if let Err(err) = fs::remove_dir_all(paths::host_config_dir(id)).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            error!("could not remove config dir for {id}: {err}");
        }
    }
}

async fn post_teardown(id: String) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    upload_log(&id).await;
    inventory().await;
}

async fn upload_log(id: &str) {
    info!("[Teardown Logsync] start for {id}");
    if pretending() {
        return;
    }
    let result = Command::new("bash")
        .arg("-c")
        .arg(format!("cd {LOGSYNC_DIR} && ./run -suffix=.log -once"))
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => info!("[Teardown Logsync] done"),
        Ok(output) => error!(
            "[Teardown Logsync] ERROR: {}",
            String::from_utf8_lossy(&output.stderr)
        ),
        Err(err) => error!("[Teardown Logsync] ERROR: {err}"),
    }
}

async fn inventory() {
    info!("[Inventory] start");
    if pretending() {
        return;
    }
    match Command::new("cmk_admin").arg("-I").output().await {
        Ok(output) if output.status.success() => info!("[Inventory] done"),
        Ok(output) => error!(
            "[Inventory] ERROR: {}",
            String::from_utf8_lossy(&output.stderr)
        ),
        Err(err) => error!("[Inventory] ERROR: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn pretend() {
        std::env::set_var("SUPERVISOR_PRETEND", "1");
    }

    fn manifest(cpu: u32, memory: u32) -> Manifest {
        Manifest {
            name: "app".to_string(),
            description: String::new(),
            instances: 1,
            cpu_shares: cpu,
            memory_limit: memory,
            app_type: String::new(),
            java_type: String::new(),
            run_commands: vec!["bin/run".to_string()],
            deps: HashMap::new(),
        }
    }

    fn config(save_dir: PathBuf) -> ManagerConfig {
        ManagerConfig {
            registry: "localhost".to_string(),
            save_dir,
            num_containers: 2,
            num_secondary: 2,
            min_port: 61000,
            cpu_shares: 100,
            memory_limit: 1024,
            enable_netsec: false,
        }
    }

    async fn init(dir: &tempfile::TempDir) -> ManagerHandle {
        pretend();
        ContainerManager::init(config(dir.path().join("save_test")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn init_rejects_port_range_overflow() {
        pretend();
        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("save_test");

        let mut bad = config(save_dir.clone());
        bad.num_containers = 1000;
        bad.num_secondary = 5;
        let err = ContainerManager::init(bad).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ConfigInvalid(_)));
        assert!(
            !save_dir.exists(),
            "a rejected config must not create the save directory"
        );

        let mut worse = config(save_dir.clone());
        worse.num_containers = 65535;
        worse.num_secondary = 65535;
        worse.min_port = 65535;
        assert!(matches!(
            ContainerManager::init(worse).await.unwrap_err(),
            SupervisorError::ConfigInvalid(_)
        ));
    }

    #[tokio::test]
    async fn reserve_assigns_deterministic_ports_and_enforces_budgets() {
        let dir = tempfile::tempdir().unwrap();
        let manager = init(&dir).await;

        let first = manager.reserve("first", manifest(50, 512)).await.unwrap();
        assert_eq!(first.primary_port, 61000);
        assert_eq!(first.ssh_port, 61002);
        assert_eq!(first.secondary_ports, vec![61004, 61006]);
        assert_eq!(first.id, "first");
        assert_eq!(first.app, "");
        assert_eq!(first.runtime_id, "");

        let err = manager.reserve("first", manifest(1, 1)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::IdInUse(_)));

        let err = manager.reserve("third", manifest(51, 1)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Not enough CPU Shares to reserve. (51 requested, 50 available)"
        );

        let err = manager.reserve("fourth", manifest(1, 513)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Not enough Memory to reserve. (513 requested, 512 available)"
        );

        let fifth = manager.reserve("fifth", manifest(1, 1)).await.unwrap();
        assert_eq!(fifth.primary_port, 61001);
        assert_eq!(fifth.ssh_port, 61003);
        assert_eq!(fifth.secondary_ports, vec![61005, 61007]);

        let err = manager.reserve("sixth", manifest(1, 1)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::SlotsExhausted));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn teardown_releases_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = init(&dir).await;

        manager.reserve("first", manifest(1, 1)).await.unwrap();
        assert!(matches!(
            manager.reserve("first", manifest(1, 1)).await.unwrap_err(),
            SupervisorError::IdInUse(_)
        ));

        assert!(manager.teardown("first").await);
        manager.reserve("first", manifest(1, 1)).await.unwrap();

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn list_returns_copies_and_absolute_ports() {
        let dir = tempfile::tempdir().unwrap();
        let manager = init(&dir).await;

        let first = manager.reserve("first", manifest(1, 1)).await.unwrap();
        let (containers, ports) = manager.list().await;
        assert_eq!(containers["first"], first);
        assert_eq!(ports, vec![61001]);

        let second = manager.reserve("second", manifest(2, 2)).await.unwrap();
        let (containers, ports) = manager.list().await;
        assert_eq!(containers["second"], second);
        assert_eq!(ports, Vec::<u16>::new());

        assert!(manager.teardown("first").await);
        let (containers, ports) = manager.list().await;
        assert!(!containers.contains_key("first"));
        assert_eq!(ports, vec![61000]);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn nums_track_all_three_budgets() {
        let dir = tempfile::tempdir().unwrap();
        let manager = init(&dir).await;

        manager.reserve("first", manifest(1, 100)).await.unwrap();
        let (containers, cpu, memory) = manager.nums().await;
        assert_eq!((containers.total, containers.used, containers.free), (2, 1, 1));
        assert_eq!((cpu.total, cpu.used, cpu.free), (100, 1, 99));
        assert_eq!((memory.total, memory.used, memory.free), (1024, 100, 924));

        manager.reserve("second", manifest(2, 200)).await.unwrap();
        let (containers, cpu, memory) = manager.nums().await;
        assert_eq!((containers.used, containers.free), (2, 0));
        assert_eq!((cpu.used, cpu.free), (3, 97));
        assert_eq!((memory.used, memory.free), (300, 724));

        assert!(manager.teardown("first").await);
        let (containers, cpu, memory) = manager.nums().await;
        assert_eq!((containers.used, containers.free), (1, 1));
        assert_eq!((cpu.used, cpu.free), (2, 98));
        assert_eq!((memory.used, memory.free), (200, 824));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn failed_reserve_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let manager = init(&dir).await;

        manager.reserve("only", manifest(50, 512)).await.unwrap();
        let before_nums = manager.nums().await;
        let before_list = manager.list().await;

        for bad in [
            manager.reserve("only", manifest(1, 1)).await,
            manager.reserve("cpu-hog", manifest(51, 1)).await,
            manager.reserve("mem-hog", manifest(1, 513)).await,
        ] {
            assert!(bad.is_err());
        }

        assert_eq!(manager.nums().await, before_nums);
        assert_eq!(manager.list().await, before_list);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn live_containers_never_share_a_port() {
        let dir = tempfile::tempdir().unwrap();
        pretend();
        let mut cfg = config(dir.path().join("save_test"));
        cfg.num_containers = 4;
        cfg.num_secondary = 3;
        let manager = ContainerManager::init(cfg).await.unwrap();

        for id in ["a", "b", "c", "d"] {
            manager.reserve(id, manifest(1, 1)).await.unwrap();
        }
        let (containers, _) = manager.list().await;
        let mut seen = HashSet::new();
        let mut count = 0;
        for container in containers.values() {
            for port in container.all_ports() {
                seen.insert(port);
                count += 1;
            }
        }
        assert_eq!(seen.len(), count, "some port was assigned twice");
        assert_eq!(seen.len(), 4 * (2 + 3));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn deploy_teardown_round_trip_restores_everything() {
        let dir = tempfile::tempdir().unwrap();
        let manager = init(&dir).await;

        let before_nums = manager.nums().await;
        let before_list = manager.list().await;

        manager.reserve("web-abc123", manifest(10, 128)).await.unwrap();
        let deployed = manager
            .deploy("web-abc123", "host1", "web", "abc123", "dev")
            .await
            .unwrap();
        assert_eq!(deployed.runtime_id, "pretend-runtime-id-web-abc123");
        assert_eq!(deployed.ip, "127.0.0.1");
        assert_eq!(deployed.app, "web");

        let fetched = manager.get("web-abc123").await.unwrap();
        assert_eq!(fetched, deployed);

        assert!(manager.teardown("web-abc123").await);
        assert_eq!(manager.nums().await, before_nums);
        assert_eq!(manager.list().await, before_list);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn deployed_containers_survive_a_restart_but_reservations_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("save_test");
        pretend();

        {
            let manager = ContainerManager::init(config(save_dir.clone())).await.unwrap();
            manager.reserve("kept", manifest(5, 64)).await.unwrap();
            manager
                .deploy("kept", "host1", "web", "sha1", "dev")
                .await
                .unwrap();
            // reserved but never deployed: intentionally not durable
            manager.reserve("lost", manifest(5, 64)).await.unwrap();
            manager.shutdown().await;
        }

        let manager = ContainerManager::init(config(save_dir)).await.unwrap();
        let (containers, _) = manager.list().await;
        assert!(containers.contains_key("kept"));
        assert!(!containers.contains_key("lost"));

        let (_, cpu, memory) = manager.nums().await;
        assert_eq!(cpu.used, 5);
        assert_eq!(memory.used, 64);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn netsec_registration_failure_rolls_the_deploy_back() {
        let dir = tempfile::tempdir().unwrap();
        pretend();
        let mut cfg = config(dir.path().join("save_test"));
        cfg.enable_netsec = true;
        let manager = ContainerManager::init(cfg).await.unwrap();

        let mut bad_manifest = manifest(1, 1);
        bad_manifest.deps.insert(
            "db".to_string(),
            atlantis_commons::AppDep {
                security_group: HashMap::from([("ghost-group".to_string(), vec![5432])]),
                encrypted_data: String::new(),
            },
        );
        manager.reserve("web-1", bad_manifest).await.unwrap();
        let err = manager
            .deploy("web-1", "host1", "web", "sha1", "dev")
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownGroup(_)));

        // The failed deploy released its slot.
        let (containers, cpu, memory) = manager.nums().await;
        assert_eq!(containers.used, 0);
        assert_eq!(cpu.used, 0);
        assert_eq!(memory.used, 0);

        manager.shutdown().await;
    }
}
