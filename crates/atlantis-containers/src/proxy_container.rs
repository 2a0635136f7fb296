use std::collections::HashMap;
use std::sync::Arc;

use atlantis_commons::{
    ProxyConfig,
    ProxyContainer,
    Serializer,
    SupervisorError,
};
use log::{
    error,
    info,
};
use tokio::sync::Mutex;

use crate::runtime::{
    pretending,
    ContainerRuntime,
};

pub const PROXY_FILE: &str = "proxy";

const PROXY_SSH_PORT: u16 = 22;
const PROXY_CONFIG_PORT: u16 = 8080;
const PROXY_MIN_EXPOSE_PORT: u16 = 40000;
const PROXY_MAX_EXPOSE_PORT: u16 = 65535;
const PROXY_NUM_HANDLERS: usize = 16;
const PROXY_MAX_PENDING: usize = 1024;
const PROXY_CPU_SHARES: u32 = 1;
const PROXY_MEMORY_LIMIT: u32 = 256;

/// Owner of the singleton reverse-proxy container. Updates deploy the
/// replacement before retiring the old instance, so the host never goes
/// without a proxy on a failed rollout.
pub struct ProxySupervisor {
    runtime: Arc<ContainerRuntime>,
    serializer: Serializer,
    current: Mutex<Option<ProxyContainer>>,
}

impl ProxySupervisor {
    pub async fn restore(runtime: Arc<ContainerRuntime>, serializer: Serializer) -> Self {
        let current = match serializer.load::<ProxyContainer>(PROXY_FILE).await {
            Ok(current) => current,
            Err(err) => {
                error!("could not restore proxy container record: {err}");
                None
            }
        };
        Self {
            runtime,
            serializer,
            current: Mutex::new(current),
        }
    }

    pub async fn get(&self) -> Option<ProxyContainer> {
        self.current.lock().await.clone()
    }

    /// Deploys `proxy-{sha}` and retires the previous instance. Failure to
    /// tear the old proxy down is logged, not propagated: the new proxy is
    /// already serving.
    pub async fn update(
        &self, host: &str, sha: &str,
    ) -> Result<ProxyContainer, SupervisorError> {
        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            if existing.sha == sha {
                return Err(SupervisorError::IdInUse(existing.id.clone()));
            }
        }

        let veth_suffix = &sha[..sha.len().min(6)];
        let mut replacement = ProxyContainer {
            id: format!("proxy-{sha}"),
            runtime_id: String::new(),
            ip: String::new(),
            host: host.to_string(),
            config_port: PROXY_CONFIG_PORT,
            ssh_port: PROXY_SSH_PORT,
            min_expose_port: PROXY_MIN_EXPOSE_PORT,
            max_expose_port: PROXY_MAX_EXPOSE_PORT,
            app: "proxy".to_string(),
            sha: sha.to_string(),
            num_handlers: PROXY_NUM_HANDLERS,
            max_pending: PROXY_MAX_PENDING,
            cpu_shares: PROXY_CPU_SHARES,
            memory_limit: PROXY_MEMORY_LIMIT,
            veth_name: format!("vethpxy{veth_suffix}"),
        };

        self.runtime.pull("system", &replacement.app, sha).await?;
        let launched = self.runtime.create_and_start_proxy(&replacement).await?;
        replacement.runtime_id = launched.runtime_id;
        replacement.ip = launched.ip;

        if let Some(old) = current.take() {
            if let Err(err) = self.runtime.kill(&old.id, &old.runtime_id).await {
                error!("teardown of old proxy {} failed: {err}", old.id);
            }
        }
        *current = Some(replacement.clone());
        if let Err(err) = self.serializer.save(PROXY_FILE, &replacement).await {
            error!("could not save proxy container record: {err}");
        }
        info!("proxy updated to {}", replacement.id);
        Ok(replacement)
    }

    /// Pushes a full listener map to the live proxy's configuration API.
    pub async fn configure(
        &self, config: &HashMap<String, ProxyConfig>,
    ) -> Result<(), SupervisorError> {
        let current = self.current.lock().await;
        let Some(proxy) = current.as_ref() else {
            return Err(SupervisorError::UnknownContainer("proxy".to_string()));
        };
        if pretending() {
            info!("[pretend] configure proxy {} with {} entries", proxy.id, config.len());
            return Ok(());
        }
        let url = format!("http://{}:{}/config", proxy.ip, proxy.config_port);
        let response = reqwest::Client::new()
            .patch(url.as_str())
            .json(config)
            .send()
            .await
            .map_err(|err| SupervisorError::Runtime(format!("proxy config push: {err}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(SupervisorError::Runtime(format!(
                "proxy config push rejected: {detail}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pretend() {
        std::env::set_var("SUPERVISOR_PRETEND", "1");
    }

    async fn supervisor(dir: &tempfile::TempDir) -> ProxySupervisor {
        pretend();
        let runtime = Arc::new(ContainerRuntime::new("localhost").unwrap());
        let serializer = Serializer::new(dir.path()).await.unwrap();
        ProxySupervisor::restore(runtime, serializer).await
    }

    #[tokio::test]
    async fn update_replaces_then_retires() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = supervisor(&dir).await;
        assert!(proxy.get().await.is_none());

        let first = proxy.update("host1", "abcdef123").await.unwrap();
        assert_eq!(first.id, "proxy-abcdef123");
        assert_eq!(first.veth_name, "vethpxyabcdef");

        // Same sha is already deployed.
        let err = proxy.update("host1", "abcdef123").await.unwrap_err();
        assert!(matches!(err, SupervisorError::IdInUse(_)));

        let second = proxy.update("host1", "0123456789").await.unwrap();
        assert_eq!(second.id, "proxy-0123456789");
        assert_eq!(proxy.get().await.unwrap(), second);
    }

    #[tokio::test]
    async fn record_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let proxy = supervisor(&dir).await;
            proxy.update("host1", "abc").await.unwrap();
        }
        let proxy = supervisor(&dir).await;
        assert_eq!(proxy.get().await.unwrap().id, "proxy-abc");
    }

    #[tokio::test]
    async fn configure_without_a_proxy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = supervisor(&dir).await;
        let err = proxy.configure(&HashMap::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownContainer(_)));
    }
}
