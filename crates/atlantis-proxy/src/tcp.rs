use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use atlantis_commons::ProxyConfig;
use log::{
    debug,
    error,
    info,
};
use tokio::io::{
    AsyncReadExt,
    AsyncWriteExt,
};
use tokio::net::{
    TcpListener,
    TcpStream,
};
use tokio::sync::{
    mpsc,
    watch,
    Mutex,
    Notify,
};
use tokio::task::JoinSet;

use crate::error::ProxyError;
use crate::traits::Proxy;

const BUFFER_SIZE: usize = 65536;

/// A TCP relay with a fixed worker pool. Accepted connections go into a
/// bounded pending queue; when the queue is full the accept loop blocks and
/// the source stack observes push-back via the listener backlog.
pub struct TcpProxy {
    local_addr: String,
    remote_addr: String,
    num_handlers: usize,
    max_pending: usize,
    listener: StdMutex<Option<TcpListener>>,
    shutdown: Notify,
    dead_tx: watch::Sender<bool>,
    dead_rx: watch::Receiver<bool>,
}

impl TcpProxy {
    pub fn new(cfg: &ProxyConfig) -> Self {
        let (dead_tx, dead_rx) = watch::channel(false);
        Self {
            local_addr: cfg.local_addr.clone(),
            remote_addr: cfg.remote_addr.clone(),
            num_handlers: cfg.num_handlers.max(1),
            max_pending: cfg.max_pending.max(1),
            listener: StdMutex::new(None),
            shutdown: Notify::new(),
            dead_tx,
            dead_rx,
        }
    }
}

#[async_trait]
impl Proxy for TcpProxy {
    async fn init(&self) -> Result<(), ProxyError> {
        let listener =
            TcpListener::bind(&self.local_addr)
                .await
                .map_err(|err| ProxyError::Bind {
                    addr: self.local_addr.clone(),
                    reason: err.to_string(),
                })?;
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    async fn listen(&self) {
        let listener = match self.listener.lock().unwrap().take() {
            Some(listener) => listener,
            None => {
                error!("[{}][TCP] listen before init", self.local_addr);
                return;
            }
        };
        info!("[{}][TCP] proxying to {}", self.local_addr, self.remote_addr);

        let (pending_tx, pending_rx) = mpsc::channel::<TcpStream>(self.max_pending);
        let pending_rx = Arc::new(Mutex::new(pending_rx));
        let mut workers = JoinSet::new();
        for id in 0..self.num_handlers {
            let pending_rx = pending_rx.clone();
            let local = self.local_addr.clone();
            let remote = self.remote_addr.clone();
            workers.spawn(async move {
                debug!("[{local}][TCP] initialized handler {id}");
                loop {
                    let conn = pending_rx.lock().await.recv().await;
                    let Some(conn) = conn else { break };
                    if let Err(err) = relay_connection(conn, &remote).await {
                        error!("[{local}][TCP] {err}");
                    }
                }
                debug!("[{local}][TCP] handler {id} done");
            });
        }

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("[{}][TCP] die", self.local_addr);
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((conn, _)) => {
                        if pending_tx.send(conn).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => error!("[{}][TCP] accept: {err}", self.local_addr),
                }
            }
        }

        // Closing the queue is the workers' sentinel: each drains what it
        // holds, then returns.
        drop(listener);
        drop(pending_tx);
        while workers.join_next().await.is_some() {}
        let _ = self.dead_tx.send(true);
    }

    async fn die(&self) {
        self.shutdown.notify_one();
        let mut dead = self.dead_rx.clone();
        let _ = dead.wait_for(|done| *done).await;
    }

    fn local_addr(&self) -> &str {
        &self.local_addr
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }
}

async fn relay_connection(conn: TcpStream, remote: &str) -> Result<(), ProxyError> {
    let upstream = TcpStream::connect(remote)
        .await
        .map_err(|err| ProxyError::Connection(format!("could not reach {remote}: {err}")))?;

    let (client_reader, client_writer) = conn.into_split();
    let (server_reader, server_writer) = upstream.into_split();

    let forward = relay_stream(client_reader, server_writer);
    let backward = relay_stream(server_reader, client_writer);

    // When either direction finishes, both halves are dropped and closed.
    tokio::select! {
        result = forward => result?,
        result = backward => result?,
    }

    Ok(())
}

async fn relay_stream(
    mut read_stream: impl AsyncReadExt + Unpin, mut write_stream: impl AsyncWriteExt + Unpin,
) -> Result<(), ProxyError> {
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        match read_stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => write_stream.write_all(&buffer[..n]).await?,
            Err(err) => return Err(ProxyError::Io(err)),
        }
    }

    write_stream.shutdown().await?;
    Ok(())
}
