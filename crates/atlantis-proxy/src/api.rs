use std::collections::HashMap;
use std::sync::Arc;

use atlantis_commons::ProxyConfig;
use bytes::Bytes;
use http::{
    Method,
    Request,
    Response,
    StatusCode,
};
use http_body_util::{
    BodyExt,
    Full,
};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{
    error,
    info,
};
use tokio::net::TcpListener;

use crate::error::ProxyError;
use crate::manager::MultiProxy;

/// Serves the proxy configuration API:
///
/// - `PUT /proxy/{local}/{remote}` adds a proxy
/// - `DELETE /proxy/{local}` removes one
/// - `GET /config` dumps the current map
/// - `PATCH /config` reconciles the whole fleet
pub async fn serve(manager: Arc<MultiProxy>, addr: &str) -> Result<(), ProxyError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| ProxyError::Bind {
            addr: addr.to_string(),
            reason: err.to_string(),
        })?;
    info!("[CONFIG] listening on {addr}");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("[CONFIG] accept: {err}");
                continue;
            }
        };
        let manager = manager.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| handle(manager.clone(), req));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("[CONFIG] connection: {err}");
            }
        });
    }
}

async fn handle(
    manager: Arc<MultiProxy>, req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let response = route(manager, req).await.unwrap_or_else(|err| {
        let status = match err {
            ProxyError::Bind { .. } | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        text_response(status, format!("{err}\n"))
    });
    Ok(response)
}

async fn route(
    manager: Arc<MultiProxy>, req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, ProxyError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::PUT, ["proxy", local, remote]) => {
            let local = sanitize_addr(local);
            let remote = sanitize_addr(remote);
            let mut cfg: ProxyConfig = read_json(req).await?;
            cfg.local_addr = local.clone();
            cfg.remote_addr = remote.clone();
            manager.add(cfg).await?;
            Ok(text_response(
                StatusCode::OK,
                format!("added {local} -> {remote}\n"),
            ))
        }
        (&Method::DELETE, ["proxy", local]) => {
            let local = sanitize_addr(local);
            manager.remove(&local).await?;
            Ok(text_response(StatusCode::OK, format!("removed {local}\n")))
        }
        (&Method::GET, ["config"]) => {
            let configs = manager.get_all().await;
            let body = serde_json::to_vec(&configs)?;
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap_or_default())
        }
        (&Method::PATCH, ["config"]) => {
            let desired: HashMap<String, ProxyConfig> = read_json(req).await?;
            manager.patch(desired).await?;
            Ok(text_response(StatusCode::OK, "patched\n".to_string()))
        }
        _ => Ok(text_response(StatusCode::NOT_FOUND, "not found\n".to_string())),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, ProxyError> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|err| ProxyError::Connection(err.to_string()))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_default()
}

/// Addresses without an explicit port default to :80.
fn sanitize_addr(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:80")
    }
}
