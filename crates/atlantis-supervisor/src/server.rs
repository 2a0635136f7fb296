use std::sync::Arc;

use atlantis_commons::models::rpc::{
    SupervisorCommand,
    SupervisorRequest,
    SupervisorResponse,
    SupervisorResult,
};
use atlantis_commons::SupervisorError;
use log::{
    debug,
    error,
    info,
};
use tokio::io::{
    AsyncBufReadExt,
    AsyncWriteExt,
    BufReader,
};
use tokio::net::{
    TcpListener,
    TcpStream,
};

use crate::rpc::container::{
    GetExecutor,
    ListExecutor,
};
use crate::rpc::deploy::{
    DeployExecutor,
    TeardownExecutor,
};
use crate::rpc::health::HealthCheckExecutor;
use crate::rpc::ipgroup::{
    DeleteIpGroupExecutor,
    UpdateIpGroupExecutor,
};
use crate::rpc::maintenance::{
    ContainerMaintenanceExecutor,
    IdleExecutor,
};
use crate::rpc::proxy::{
    ConfigureProxyExecutor,
    GetProxyExecutor,
    UpdateProxyExecutor,
};
use crate::rpc::ssh::{
    AuthorizeSshExecutor,
    DeauthorizeSshExecutor,
};
use crate::rpc::version::VersionExecutor;
use crate::rpc::{
    run_task,
    SupervisorContext,
};

/// Newline-delimited JSON request/reply loop. A bind failure here is a
/// startup failure; steady-state connection errors only cost that
/// connection.
pub async fn serve(addr: &str, ctx: Arc<SupervisorContext>) -> Result<(), SupervisorError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| SupervisorError::Bind {
            addr: addr.to_string(),
            reason: err.to_string(),
        })?;
    info!("[RPC] listening on {addr}");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("[RPC] accept: {err}");
                continue;
            }
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, ctx).await {
                debug!("[RPC] connection from {peer}: {err}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream, ctx: Arc<SupervisorContext>,
) -> Result<(), SupervisorError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<SupervisorRequest>(&line) {
            Ok(request) => dispatch(&ctx, request).await,
            Err(err) => {
                SupervisorResponse::failure(String::new(), format!("bad request: {err}"))
            }
        };
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
    }
    Ok(())
}

/// Runs one typed operation as a tracked task and wraps the outcome in the
/// reply envelope.
pub async fn dispatch(
    ctx: &SupervisorContext, request: SupervisorRequest,
) -> SupervisorResponse {
    let request_id = request.request_id;
    let result = match request.command {
        SupervisorCommand::HealthCheck(arg) => {
            run_task("HealthCheck", HealthCheckExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::HealthCheck)
        }
        SupervisorCommand::Deploy(arg) => run_task("Deploy", DeployExecutor { arg }, ctx)
            .await
            .map(SupervisorResult::Deploy),
        SupervisorCommand::Teardown(arg) => {
            run_task("Teardown", TeardownExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::Teardown)
        }
        SupervisorCommand::Get(arg) => run_task("Get", GetExecutor { arg }, ctx)
            .await
            .map(SupervisorResult::Get),
        SupervisorCommand::List(arg) => run_task("List", ListExecutor { arg }, ctx)
            .await
            .map(SupervisorResult::List),
        SupervisorCommand::AuthorizeSsh(arg) => {
            run_task("AuthorizeSSH", AuthorizeSshExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::AuthorizeSsh)
        }
        SupervisorCommand::DeauthorizeSsh(arg) => {
            run_task("DeauthorizeSSH", DeauthorizeSshExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::DeauthorizeSsh)
        }
        SupervisorCommand::ContainerMaintenance(arg) => run_task(
            "ContainerMaintenance",
            ContainerMaintenanceExecutor { arg },
            ctx,
        )
        .await
        .map(SupervisorResult::ContainerMaintenance),
        SupervisorCommand::Idle(arg) => run_task("Idle", IdleExecutor { arg }, ctx)
            .await
            .map(SupervisorResult::Idle),
        SupervisorCommand::UpdateIpGroup(arg) => {
            run_task("UpdateIPGroup", UpdateIpGroupExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::UpdateIpGroup)
        }
        SupervisorCommand::DeleteIpGroup(arg) => {
            run_task("DeleteIPGroup", DeleteIpGroupExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::DeleteIpGroup)
        }
        SupervisorCommand::UpdateProxy(arg) => {
            run_task("UpdateProxy", UpdateProxyExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::UpdateProxy)
        }
        SupervisorCommand::GetProxy(arg) => {
            run_task("GetProxy", GetProxyExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::GetProxy)
        }
        SupervisorCommand::ConfigureProxy(arg) => {
            run_task("ConfigureProxy", ConfigureProxyExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::ConfigureProxy)
        }
        SupervisorCommand::Version(arg) => {
            run_task("Version", VersionExecutor { arg }, ctx)
                .await
                .map(SupervisorResult::Version)
        }
    };
    match result {
        Ok(result) => SupervisorResponse::success(request_id, result),
        Err(err) => SupervisorResponse::failure(request_id, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use atlantis_commons::models::rpc::{
        DeployArg,
        HealthCheckArg,
        IdleArg,
        ListArg,
        Status,
        TeardownArg,
        VersionArg,
    };
    use atlantis_commons::{
        Manifest,
        Serializer,
    };
    use atlantis_containers::{
        ContainerManager,
        ManagerConfig,
        ProxySupervisor,
    };

    use super::*;
    use crate::tracker::TaskTracker;

    fn manifest(cpu: u32, memory: u32) -> Manifest {
        Manifest {
            name: "app".to_string(),
            description: String::new(),
            instances: 1,
            cpu_shares: cpu,
            memory_limit: memory,
            app_type: String::new(),
            java_type: String::new(),
            run_commands: vec![],
            deps: HashMap::new(),
        }
    }

    async fn context(save_dir: PathBuf) -> SupervisorContext {
        std::env::set_var("SUPERVISOR_PRETEND", "1");
        let manager = ContainerManager::init(ManagerConfig {
            registry: "localhost".to_string(),
            save_dir: save_dir.clone(),
            num_containers: 2,
            num_secondary: 2,
            min_port: 61000,
            cpu_shares: 100,
            memory_limit: 1024,
            enable_netsec: false,
        })
        .await
        .unwrap();
        let serializer = Serializer::new(&save_dir).await.unwrap();
        let proxy = Arc::new(ProxySupervisor::restore(manager.runtime(), serializer).await);
        SupervisorContext {
            manager,
            proxy,
            tracker: TaskTracker::new(),
            region: "dev".to_string(),
            zone: "dev".to_string(),
        }
    }

    async fn deploy(ctx: &SupervisorContext, id: &str) {
        let response = dispatch(
            ctx,
            SupervisorRequest::new(SupervisorCommand::Deploy(DeployArg {
                host: "host1".to_string(),
                app: "web".to_string(),
                sha: "abc".to_string(),
                env: "dev".to_string(),
                container_id: id.to_string(),
                manifest: manifest(1, 1),
            })),
        )
        .await;
        assert!(response.error.is_none(), "deploy failed: {:?}", response.error);
    }

    async fn health_status(ctx: &SupervisorContext) -> (Status, u32) {
        let response = dispatch(
            ctx,
            SupervisorRequest::new(SupervisorCommand::HealthCheck(HealthCheckArg {})),
        )
        .await;
        match response.result {
            Some(SupervisorResult::HealthCheck(reply)) => (reply.status, reply.containers.free),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_transitions_ok_full_ok() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("save")).await;

        assert_eq!(health_status(&ctx).await, (Status::Ok, 2));

        deploy(&ctx, "one").await;
        assert_eq!(health_status(&ctx).await, (Status::Ok, 1));

        deploy(&ctx, "two").await;
        assert_eq!(health_status(&ctx).await, (Status::Full, 0));

        let response = dispatch(
            &ctx,
            SupervisorRequest::new(SupervisorCommand::Teardown(TeardownArg {
                container_ids: vec![],
                all: true,
            })),
        )
        .await;
        match response.result {
            Some(SupervisorResult::Teardown(reply)) => {
                assert_eq!(reply.status, Status::Ok);
                assert_eq!(reply.container_ids.len(), 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert_eq!(health_status(&ctx).await, (Status::Ok, 2));
        ctx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn teardown_reports_unknown_ids_with_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("save")).await;
        deploy(&ctx, "real").await;

        let response = dispatch(
            &ctx,
            SupervisorRequest::new(SupervisorCommand::Teardown(TeardownArg {
                container_ids: vec!["ghost".to_string(), "real".to_string()],
                all: false,
            })),
        )
        .await;
        match response.result {
            Some(SupervisorResult::Teardown(reply)) => {
                assert_eq!(reply.status, Status::Error);
                assert_eq!(reply.container_ids, vec!["real".to_string()]);
                assert!(reply.message.unwrap().contains("no such container: ghost"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        ctx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn maintenance_gates_everything_but_the_exempt_ops() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("save")).await;
        ctx.tracker.set_maintenance(true);

        let refused = dispatch(
            &ctx,
            SupervisorRequest::new(SupervisorCommand::List(ListArg {})),
        )
        .await;
        assert!(refused.error.unwrap().contains("maintenance"));

        let idle = dispatch(
            &ctx,
            SupervisorRequest::new(SupervisorCommand::Idle(IdleArg {})),
        )
        .await;
        match idle.result {
            Some(SupervisorResult::Idle(reply)) => assert!(reply.idle),
            other => panic!("unexpected result: {other:?}"),
        }

        let version = dispatch(
            &ctx,
            SupervisorRequest::new(SupervisorCommand::Version(VersionArg {})),
        )
        .await;
        match version.result {
            Some(SupervisorResult::Version(reply)) => {
                assert_eq!(reply.rpc_version, crate::config::RPC_VERSION);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert_eq!(health_status(&ctx).await.0, Status::Maintenance);
        ctx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn deploy_validates_its_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("save")).await;

        let response = dispatch(
            &ctx,
            SupervisorRequest::new(SupervisorCommand::Deploy(DeployArg {
                host: "host1".to_string(),
                app: String::new(),
                sha: "abc".to_string(),
                env: "dev".to_string(),
                container_id: "x".to_string(),
                manifest: manifest(1, 1),
            })),
        )
        .await;
        assert!(response.error.unwrap().contains("app"));

        let response = dispatch(
            &ctx,
            SupervisorRequest::new(SupervisorCommand::Deploy(DeployArg {
                host: "host1".to_string(),
                app: "web".to_string(),
                sha: "abc".to_string(),
                env: "dev".to_string(),
                container_id: "x".to_string(),
                manifest: manifest(0, 1),
            })),
        )
        .await;
        assert!(response.error.unwrap().contains("CPU shares"));
        ctx.manager.shutdown().await;
    }
}
