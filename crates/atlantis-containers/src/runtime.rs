use std::collections::HashMap;
use std::env;

use atlantis_commons::{
    Container,
    ProxyContainer,
    SupervisorError,
};
use bollard::container::{
    Config,
    CreateContainerOptions,
    InspectContainerOptions,
    KillContainerOptions,
    ListContainersOptions,
    RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    HostConfig,
    PortBinding,
};
use bollard::Docker;
use futures::StreamExt;
use log::{
    error,
    info,
};
use tokio::sync::Mutex;

const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const MEGABYTE: i64 = 1024 * 1024;

/// `SUPERVISOR_PRETEND` disables every host-side effect: runtime calls,
/// filter rules, and ssh all log what they would have done instead.
pub fn pretending() -> bool {
    env::var("SUPERVISOR_PRETEND").is_ok_and(|value| !value.is_empty())
}

/// What a successful create+start leaves behind.
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub runtime_id: String,
    pub ip: String,
    pub pid: i64,
}

/// Thin facade over the container runtime daemon. The client mutex keeps
/// pulls and creates sequential; the daemon handles its own internal
/// parallelism.
#[derive(Debug)]
pub struct ContainerRuntime {
    registry: String,
    docker: Option<Docker>,
    lock: Mutex<()>,
}

impl ContainerRuntime {
    pub fn new(registry: &str) -> Result<Self, SupervisorError> {
        let docker = if pretending() {
            None
        } else {
            let client =
                Docker::connect_with_unix(DOCKER_SOCKET, 120, bollard::API_DEFAULT_VERSION)
                    .map_err(|err| {
                        SupervisorError::Runtime(format!(
                            "could not connect to {DOCKER_SOCKET}: {err}"
                        ))
                    })?;
            Some(client)
        };
        Ok(Self {
            registry: registry.to_string(),
            docker,
            lock: Mutex::new(()),
        })
    }

    fn image_for(&self, repo: &str, app: &str, sha: &str) -> String {
        format!("{}/{}/{}-{}", self.registry, repo, app, sha)
    }

    fn client(&self) -> Result<&Docker, SupervisorError> {
        self.docker
            .as_ref()
            .ok_or_else(|| SupervisorError::Runtime("runtime client not initialized".to_string()))
    }

    /// Pulls `registry/{repo}/{app}-{sha}`, running the image stream to
    /// completion or error.
    pub async fn pull(&self, repo: &str, app: &str, sha: &str) -> Result<(), SupervisorError> {
        let image = self.image_for(repo, app, sha);
        if pretending() {
            info!("[pretend] pull {image}");
            return Ok(());
        }
        let docker = self.client()?;
        let _guard = self.lock.lock().await;
        info!("pull {image}");
        let options = CreateImageOptions {
            from_image: image.clone(),
            ..Default::default()
        };
        let mut stream = docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|err| {
                SupervisorError::Runtime(format!("could not pull {image}: {err}"))
            })?;
        }
        Ok(())
    }

    /// Creates and starts the container, then inspects it for the assigned
    /// IP and PID. A container that starts without network settings is a
    /// runtime error; the half-started container is killed before the error
    /// propagates.
    pub async fn create_and_start_container(
        &self, container: &Container,
    ) -> Result<RuntimeInfo, SupervisorError> {
        if pretending() {
            info!("[pretend] run {}", container.id);
            return Ok(RuntimeInfo {
                runtime_id: format!("pretend-runtime-id-{}", container.id),
                ip: "127.0.0.1".to_string(),
                pid: 0,
            });
        }
        let (config, name) = self.app_container_config(container);
        self.create_and_start(&name, config).await
    }

    pub async fn create_and_start_proxy(
        &self, proxy: &ProxyContainer,
    ) -> Result<RuntimeInfo, SupervisorError> {
        if pretending() {
            info!("[pretend] run {}", proxy.id);
            return Ok(RuntimeInfo {
                runtime_id: format!("pretend-runtime-id-{}", proxy.id),
                ip: "127.0.0.1".to_string(),
                pid: 0,
            });
        }
        let (config, name) = self.proxy_container_config(proxy);
        self.create_and_start(&name, config).await
    }

    async fn create_and_start(
        &self, name: &str, config: Config<String>,
    ) -> Result<RuntimeInfo, SupervisorError> {
        let docker = self.client()?;
        let _guard = self.lock.lock().await;
        info!("run {name}");

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let created = docker
            .create_container(Some(options), config)
            .await
            .map_err(|err| SupervisorError::Runtime(format!("could not create {name}: {err}")))?;
        let runtime_id = created.id;

        if let Err(err) = docker
            .start_container(&runtime_id, None::<StartContainerOptions<String>>)
            .await
        {
            self.kill_locked(docker, name, &runtime_id).await;
            return Err(SupervisorError::Runtime(format!(
                "could not start {name}: {err}"
            )));
        }

        let inspected = match docker
            .inspect_container(&runtime_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspected) => inspected,
            Err(err) => {
                self.kill_locked(docker, name, &runtime_id).await;
                return Err(SupervisorError::Runtime(format!(
                    "could not inspect {name}: {err}"
                )));
            }
        };
        let ip = inspected
            .network_settings
            .and_then(|settings| settings.ip_address)
            .filter(|ip| !ip.is_empty());
        let Some(ip) = ip else {
            self.kill_locked(docker, name, &runtime_id).await;
            return Err(SupervisorError::Runtime(format!(
                "{name} has no network settings"
            )));
        };
        let pid = inspected.state.and_then(|state| state.pid).unwrap_or(0);

        Ok(RuntimeInfo {
            runtime_id,
            ip,
            pid,
        })
    }

    /// Kills the runtime container and sweeps exited ones. Used by teardown
    /// and by deploy failure paths; callers treat failures as best-effort.
    pub async fn kill(&self, id: &str, runtime_id: &str) -> Result<(), SupervisorError> {
        if pretending() {
            info!("[pretend] kill {id}");
            return Ok(());
        }
        if runtime_id.is_empty() {
            return Ok(());
        }
        let docker = self.client()?;
        {
            let _guard = self.lock.lock().await;
            self.kill_locked(docker, id, runtime_id).await;
        }
        self.remove_exited().await;
        Ok(())
    }

    async fn kill_locked(&self, docker: &Docker, id: &str, runtime_id: &str) {
        info!("kill {id}");
        if let Err(err) = docker
            .kill_container(runtime_id, None::<KillContainerOptions<String>>)
            .await
        {
            error!("failed to kill {id}: {err}");
        }
    }

    /// Sweeps away exited containers so dead slots do not pile up in the
    /// daemon.
    pub async fn remove_exited(&self) {
        if pretending() {
            return;
        }
        let Ok(docker) = self.client() else {
            return;
        };
        let _guard = self.lock.lock().await;
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let listed = match docker.list_containers(Some(options)).await {
            Ok(listed) => listed,
            Err(err) => {
                error!("[RemoveExited] could not list containers: {err}");
                return;
            }
        };
        for summary in listed {
            let status = summary.status.unwrap_or_default();
            if !status.starts_with("Exit") {
                continue;
            }
            let Some(id) = summary.id else { continue };
            info!("[RemoveExited] remove {id} ({status})");
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(err) = docker.remove_container(&id, Some(options)).await {
                error!("[RemoveExited] -> error: {err}");
            }
        }
    }

    fn app_container_config(&self, container: &Container) -> (Config<String>, String) {
        let mut envs = vec![
            "ATLANTIS=true".to_string(),
            format!("CONTAINER_ID={}", container.id),
            format!("CONTAINER_HOST={}", container.host),
            format!("CONTAINER_ENV={}", container.env),
            format!("HTTP_PORT={}", container.primary_port),
            format!("SSHD_PORT={}", container.ssh_port),
        ];

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in [container.primary_port, container.ssh_port] {
            bind_port(&mut exposed_ports, &mut port_bindings, port);
        }
        for (index, &port) in container.secondary_ports.iter().enumerate() {
            bind_port(&mut exposed_ports, &mut port_bindings, port);
            envs.push(format!("SECONDARY_PORT{index}={port}"));
        }

        let host_config = HostConfig {
            binds: Some(vec![
                format!(
                    "/var/log/atlantis/containers/{}:/var/log/atlantis/syslog",
                    container.id
                ),
                format!(
                    "/etc/atlantis/containers/{}:/etc/atlantis/config",
                    container.id
                ),
            ]),
            port_bindings: Some(port_bindings),
            cpu_shares: Some(container.manifest.cpu_shares as i64),
            memory: Some(container.manifest.memory_limit as i64 * MEGABYTE),
            // -1 turns swap off
            memory_swap: Some(-1),
            ..Default::default()
        };

        // The runtime no longer lets us name the veth pair directly; record
        // the computed name as a label so operators can still find it. The
        // authoritative veth is resolved from the PID at registration time.
        let labels =
            HashMap::from([("atlantis.veth".to_string(), container.veth_name())]);

        let config = Config {
            image: Some(self.image_for("apps", &container.app, &container.sha)),
            env: Some(envs),
            // images already specify their run command
            cmd: Some(vec![]),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };
        (config, container.id.clone())
    }

    fn proxy_container_config(&self, proxy: &ProxyContainer) -> (Config<String>, String) {
        let envs = vec![
            "ATLANTIS=true".to_string(),
            format!("CONTAINER_ID={}", proxy.id),
            format!("CONTAINER_HOST={}", proxy.host),
            format!("CONFIG_PORT={}", proxy.config_port),
            format!("SSHD_PORT={}", proxy.ssh_port),
            format!("MIN_EXPOSE_PORT={}", proxy.min_expose_port),
            format!("MAX_EXPOSE_PORT={}", proxy.max_expose_port),
            format!("NUM_HANDLERS={}", proxy.num_handlers),
            format!("MAX_PENDING={}", proxy.max_pending),
        ];

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in [proxy.config_port, proxy.ssh_port] {
            bind_port(&mut exposed_ports, &mut port_bindings, port);
        }

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            cpu_shares: Some(proxy.cpu_shares as i64),
            memory: Some(proxy.memory_limit as i64 * MEGABYTE),
            memory_swap: Some(-1),
            ..Default::default()
        };

        let labels =
            HashMap::from([("atlantis.veth".to_string(), proxy.veth_name.clone())]);

        let config = Config {
            image: Some(self.image_for("system", &proxy.app, &proxy.sha)),
            env: Some(envs),
            cmd: Some(vec![]),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };
        (config, proxy.id.clone())
    }
}

fn bind_port(
    exposed_ports: &mut HashMap<String, HashMap<(), ()>>,
    port_bindings: &mut HashMap<String, Option<Vec<PortBinding>>>, port: u16,
) {
    let key = format!("{port}/tcp");
    exposed_ports.insert(key.clone(), HashMap::new());
    // host port = container port
    port_bindings.insert(
        key,
        Some(vec![PortBinding {
            host_ip: Some(String::new()),
            host_port: Some(port.to_string()),
        }]),
    );
}
