use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use atlantis_commons::ProxyConfig;
use bytes::Bytes;
use http::header::HOST;
use http::{
    Request,
    Response,
    StatusCode,
    Uri,
};
use http_body_util::{
    BodyExt,
    Full,
};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{
    TokioExecutor,
    TokioIo,
    TokioTimer,
};
use log::{
    error,
    info,
};
use tokio::net::TcpListener;
use tokio::sync::{
    watch,
    Notify,
};
use tokio::task::JoinSet;

use crate::error::ProxyError;
use crate::traits::Proxy;

const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_HEADER_BYTES: usize = 1 << 20;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// A single-upstream HTTP reverse proxy. Every request is forwarded to
/// `http://remote_addr` with the host header overridden.
pub struct HttpProxy {
    local_addr: String,
    remote_addr: String,
    listener: StdMutex<Option<TcpListener>>,
    shutdown: Notify,
    dead_tx: watch::Sender<bool>,
    dead_rx: watch::Receiver<bool>,
}

impl HttpProxy {
    pub fn new(cfg: &ProxyConfig) -> Self {
        let (dead_tx, dead_rx) = watch::channel(false);
        Self {
            local_addr: cfg.local_addr.clone(),
            remote_addr: cfg.remote_addr.clone(),
            listener: StdMutex::new(None),
            shutdown: Notify::new(),
            dead_tx,
            dead_rx,
        }
    }
}

#[async_trait]
impl Proxy for HttpProxy {
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
                error!("[{}][HTTP] listen before init", self.local_addr);
                return;
            }
        };
        info!("[{}][HTTP] proxying to {}", self.local_addr, self.remote_addr);

        let client: HttpClient = Client::builder(TokioExecutor::new()).build_http();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("[{}][HTTP] die", self.local_addr);
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let client = client.clone();
                        let remote = self.remote_addr.clone();
                        let local = self.local_addr.clone();
                        connections.spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                forward(client.clone(), remote.clone(), req)
                            });
                            let served = http1::Builder::new()
                                .timer(TokioTimer::new())
                                .header_read_timeout(READ_WRITE_TIMEOUT)
                                .max_buf_size(MAX_HEADER_BYTES)
                                .serve_connection(io, service)
                                .await;
                            if let Err(err) = served {
                                error!("[{local}][HTTP] connection: {err}");
                            }
                        });
                    }
                    Err(err) => error!("[{}][HTTP] accept: {err}", self.local_addr),
                }
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}
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

async fn forward(
    client: HttpClient, remote: String, req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    match proxy_request(client, &remote, req).await {
        Ok(response) => Ok(response),
        Err(err) => {
            error!("[{remote}][HTTP] upstream: {err}");
            Ok(Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(Full::new(Bytes::from(err.to_string())))
                .unwrap_or_default())
        }
    }
}

async fn proxy_request(
    client: HttpClient, remote: &str, req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, ProxyError> {
    let (parts, body) = req.into_parts();
    let body = tokio::time::timeout(READ_WRITE_TIMEOUT, body.collect())
        .await
        .map_err(|_| ProxyError::Connection("timed out reading request body".to_string()))?
        .map_err(|err| ProxyError::Connection(err.to_string()))?
        .to_bytes();

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("http://{remote}{path}")
        .parse()
        .map_err(|err| ProxyError::Configuration(format!("bad upstream uri: {err}")))?;

    let mut outbound = Request::builder().method(parts.method).uri(uri);
    for (name, value) in parts.headers.iter() {
        if name != HOST {
            outbound = outbound.header(name, value);
        }
    }
    let outbound = outbound
        .header(HOST, remote)
        .body(Full::new(body))
        .map_err(|err| ProxyError::Connection(err.to_string()))?;

    let response = tokio::time::timeout(READ_WRITE_TIMEOUT, client.request(outbound))
        .await
        .map_err(|_| ProxyError::Connection("timed out waiting for upstream".to_string()))?
        .map_err(|err| ProxyError::Connection(err.to_string()))?;

    let (parts, body) = response.into_parts();
    let body = tokio::time::timeout(READ_WRITE_TIMEOUT, body.collect())
        .await
        .map_err(|_| ProxyError::Connection("timed out reading upstream body".to_string()))?
        .map_err(|err| ProxyError::Connection(err.to_string()))?
        .to_bytes();

    Ok(Response::from_parts(parts, Full::new(body)))
}
