use std::sync::Arc;

use atlantis_commons::models::rpc::HealthCheckArg;
use atlantis_commons::SupervisorError;
use bytes::Bytes;
use http::{
    Method,
    Request,
    Response,
    StatusCode,
};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{
    error,
    info,
};
use tokio::net::TcpListener;

use crate::rpc::health::HealthCheckExecutor;
use crate::rpc::{
    run_task,
    SupervisorContext,
};

/// Plain HTTP health endpoint for load balancers: `GET /healthz` answers
/// with the HealthCheck status string.
pub async fn serve(port: u16, ctx: Arc<SupervisorContext>) -> Result<(), SupervisorError> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| SupervisorError::Bind {
            addr: addr.clone(),
            reason: err.to_string(),
        })?;
    info!("[healthz] listening on {addr}");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("[healthz] accept: {err}");
                continue;
            }
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| handle(ctx.clone(), req));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("[healthz] connection: {err}");
            }
        });
    }
}

async fn handle(
    ctx: Arc<SupervisorContext>, req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    if req.method() != Method::GET || req.uri().path() != "/healthz" {
        return Ok(plain(StatusCode::NOT_FOUND, "not found\n"));
    }
    let executor = HealthCheckExecutor {
        arg: HealthCheckArg {},
    };
    let response = match run_task("HealthCheck", executor, &ctx).await {
        Ok(reply) => plain(StatusCode::OK, &reply.status.to_string()),
        Err(err) => plain(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    };
    Ok(response)
}

fn plain(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}
