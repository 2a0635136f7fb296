use std::collections::HashMap;
use std::sync::Arc;

use atlantis_commons::{
    ProxyConfig,
    ProxyKind,
    Serializer,
};
use log::{
    error,
    info,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::ProxyError;
use crate::http::HttpProxy;
use crate::tcp::TcpProxy;
use crate::traits::Proxy;

pub const PROXY_FILE: &str = "proxy";
pub const DEFAULT_NUM_HANDLERS: usize = 16;
pub const DEFAULT_MAX_PENDING: usize = 1024;

struct ProxyEntry {
    cfg: ProxyConfig,
    proxy: Arc<dyn Proxy>,
    task: JoinHandle<()>,
}

/// Supervises the listener fleet, keyed by local address. The map lock
/// serializes configuration changes; the listeners themselves run on their
/// own tasks.
pub struct MultiProxy {
    serializer: Serializer,
    default_num_handlers: usize,
    default_max_pending: usize,
    proxies: Mutex<HashMap<String, ProxyEntry>>,
}

impl MultiProxy {
    pub fn new(serializer: Serializer, num_handlers: usize, max_pending: usize) -> Self {
        Self {
            serializer,
            default_num_handlers: num_handlers,
            default_max_pending: max_pending,
            proxies: Mutex::new(HashMap::new()),
        }
    }

    /// Re-inits and runs every persisted proxy. A bind failure here is
    /// fatal: a half-restored fleet is worse than a crashed reload.
    pub async fn load(&self) -> Result<(), ProxyError> {
        let saved: HashMap<String, ProxyConfig> = match self
            .serializer
            .load(PROXY_FILE)
            .await
        {
            Ok(Some(saved)) => saved,
            Ok(None) => return Ok(()),
            Err(err) => {
                error!("[CONFIG] could not read saved proxies: {err}");
                return Ok(());
            }
        };
        let mut proxies = self.proxies.lock().await;
        for (local_addr, cfg) in saved {
            let entry = self.start(cfg).await?;
            info!("[CONFIG] restored {} -> {}", local_addr, entry.cfg.remote_addr);
            proxies.insert(local_addr, entry);
        }
        Ok(())
    }

    pub async fn add(&self, cfg: ProxyConfig) -> Result<(), ProxyError> {
        let mut proxies = self.proxies.lock().await;
        if let Some(existing) = proxies.get(&cfg.local_addr) {
            return Err(ProxyError::AlreadyProxying(
                cfg.local_addr,
                existing.cfg.remote_addr.clone(),
            ));
        }
        let entry = self.start(cfg).await?;
        info!("[CONFIG] added {} -> {}", entry.cfg.local_addr, entry.cfg.remote_addr);
        proxies.insert(entry.cfg.local_addr.clone(), entry);
        self.save(&proxies).await;
        Ok(())
    }

    pub async fn remove(&self, local_addr: &str) -> Result<(), ProxyError> {
        let mut proxies = self.proxies.lock().await;
        let Some(entry) = proxies.remove(local_addr) else {
            return Err(ProxyError::NotProxying(local_addr.to_string()));
        };
        stop(entry).await;
        info!("[CONFIG] removed {local_addr}");
        self.save(&proxies).await;
        Ok(())
    }

    pub async fn get_all(&self) -> HashMap<String, ProxyConfig> {
        self.proxies
            .lock()
            .await
            .iter()
            .map(|(local_addr, entry)| (local_addr.clone(), entry.cfg.clone()))
            .collect()
    }

    /// Reconciles the fleet against `desired`. A proxy whose (local,
    /// remote) pair is unchanged is left running untouched; everything else
    /// is stopped and/or started. Patching the same set twice is a no-op.
    pub async fn patch(
        &self, desired: HashMap<String, ProxyConfig>,
    ) -> Result<(), ProxyError> {
        let mut proxies = self.proxies.lock().await;

        for (local_addr, cfg) in &desired {
            match proxies.get(local_addr) {
                Some(entry)
                    if entry.cfg.local_addr == cfg.local_addr
                        && entry.cfg.remote_addr == cfg.remote_addr =>
                {
                    continue;
                }
                Some(_) => {
                    let entry = proxies.remove(local_addr).expect("entry just observed");
                    stop(entry).await;
                    match self.start(cfg.clone()).await {
                        Ok(entry) => {
                            info!("[CONFIG] replaced {} -> {}", local_addr, cfg.remote_addr);
                            proxies.insert(local_addr.clone(), entry);
                        }
                        Err(err) => error!("[CONFIG] ERROR: {err}"),
                    }
                }
                None => match self.start(cfg.clone()).await {
                    Ok(entry) => {
                        info!("[CONFIG] added {} -> {}", local_addr, cfg.remote_addr);
                        proxies.insert(local_addr.clone(), entry);
                    }
                    Err(err) => error!("[CONFIG] ERROR: {err}"),
                },
            }
        }

        let stale: Vec<String> = proxies
            .keys()
            .filter(|local_addr| !desired.contains_key(*local_addr))
            .cloned()
            .collect();
        for local_addr in stale {
            let entry = proxies.remove(&local_addr).expect("stale entry present");
            stop(entry).await;
            info!("[CONFIG] removed {local_addr}");
        }

        self.save(&proxies).await;
        Ok(())
    }

    /// Stops every listener. Used on shutdown.
    pub async fn die_all(&self) {
        let mut proxies = self.proxies.lock().await;
        for (_, entry) in proxies.drain() {
            stop(entry).await;
        }
    }

    async fn start(&self, mut cfg: ProxyConfig) -> Result<ProxyEntry, ProxyError> {
        if cfg.num_handlers == 0 {
            cfg.num_handlers = self.default_num_handlers;
        }
        if cfg.max_pending == 0 {
            cfg.max_pending = self.default_max_pending;
        }
        let proxy: Arc<dyn Proxy> = match cfg.kind {
            ProxyKind::Tcp => Arc::new(TcpProxy::new(&cfg)),
            ProxyKind::Http => Arc::new(HttpProxy::new(&cfg)),
        };
        proxy.init().await?;
        let task = {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.listen().await })
        };
        Ok(ProxyEntry { cfg, proxy, task })
    }

    async fn save(&self, proxies: &HashMap<String, ProxyEntry>) {
        let configs: HashMap<&String, &ProxyConfig> = proxies
            .iter()
            .map(|(local_addr, entry)| (local_addr, &entry.cfg))
            .collect();
        if let Err(err) = self.serializer.save(PROXY_FILE, &configs).await {
            error!("[CONFIG] could not save proxy map: {err}");
        }
    }
}

async fn stop(entry: ProxyEntry) {
    entry.proxy.die().await;
    let _ = entry.task.await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{
        AsyncReadExt,
        AsyncWriteExt,
    };
    use tokio::net::{
        TcpListener,
        TcpStream,
    };

    use super::*;

    async fn spawn_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = socket.split();
                    let mut buf = vec![0u8; 1024];
                    while let Ok(n) = reader.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        if writer.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    async fn manager() -> (MultiProxy, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let serializer = Serializer::new(dir.path()).await.unwrap();
        (MultiProxy::new(serializer, 2, 8), dir)
    }

    fn local_addr() -> String {
        format!("127.0.0.1:{}", portpicker::pick_unused_port().unwrap())
    }

    async fn echo_through(local: &str) -> bool {
        let Ok(mut conn) = TcpStream::connect(local).await else {
            return false;
        };
        if conn.write_all(b"probe").await.is_err() {
            return false;
        }
        let mut buf = [0u8; 5];
        tokio::time::timeout(Duration::from_secs(2), conn.read_exact(&mut buf))
            .await
            .map(|read| read.is_ok() && &buf == b"probe")
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn add_remove_round_trip() {
        let (manager, _dir) = manager().await;
        let echo = spawn_echo_server().await;
        let local = local_addr();

        manager.add(ProxyConfig::tcp(&local, &echo)).await.unwrap();
        assert!(echo_through(&local).await);

        let err = manager
            .add(ProxyConfig::tcp(&local, "other:80"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::AlreadyProxying(_, _)));

        manager.remove(&local).await.unwrap();
        assert!(!echo_through(&local).await);
        assert!(matches!(
            manager.remove(&local).await.unwrap_err(),
            ProxyError::NotProxying(_)
        ));
    }

    #[tokio::test]
    async fn patch_starts_new_and_leaves_identical_untouched() {
        let (manager, _dir) = manager().await;
        let echo = spawn_echo_server().await;
        let local_a = local_addr();
        let local_b = local_addr();

        manager.add(ProxyConfig::tcp(&local_a, &echo)).await.unwrap();

        // A connection through A that must survive the patches below: an
        // untouched proxy keeps even its live flows.
        let mut held = TcpStream::connect(&local_a).await.unwrap();
        held.write_all(b"before").await.unwrap();
        let mut buf = [0u8; 6];
        held.read_exact(&mut buf).await.unwrap();

        let desired = HashMap::from([
            (local_a.clone(), ProxyConfig::tcp(&local_a, &echo)),
            (local_b.clone(), ProxyConfig::tcp(&local_b, &echo)),
        ]);
        manager.patch(desired.clone()).await.unwrap();
        assert!(echo_through(&local_b).await);

        // Second identical patch: nothing restarts.
        manager.patch(desired).await.unwrap();

        held.write_all(b"after!").await.unwrap();
        held.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"after!");
        // Close the flow before dropping A: stopping a proxy waits for its
        // in-flight connections to drain.
        drop(held);

        manager
            .patch(HashMap::from([(
                local_b.clone(),
                ProxyConfig::tcp(&local_b, &echo),
            )]))
            .await
            .unwrap();
        assert!(!echo_through(&local_a).await);
        assert!(echo_through(&local_b).await);

        manager.die_all().await;
    }

    #[tokio::test]
    async fn persisted_fleet_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let echo = spawn_echo_server().await;
        let local = local_addr();

        {
            let serializer = Serializer::new(dir.path()).await.unwrap();
            let manager = MultiProxy::new(serializer, 2, 8);
            manager.add(ProxyConfig::tcp(&local, &echo)).await.unwrap();
            manager.die_all().await;
        }

        let serializer = Serializer::new(dir.path()).await.unwrap();
        let manager = MultiProxy::new(serializer, 2, 8);
        manager.load().await.unwrap();
        assert!(manager.get_all().await.contains_key(&local));
        assert!(echo_through(&local).await);
        manager.die_all().await;
    }
}
