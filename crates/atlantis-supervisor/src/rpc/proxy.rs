use async_trait::async_trait;
use atlantis_commons::models::rpc::{
    ConfigureProxyArg,
    ConfigureProxyReply,
    GetProxyArg,
    GetProxyReply,
    Status,
    UpdateProxyArg,
    UpdateProxyReply,
};
use atlantis_commons::SupervisorError;

use crate::rpc::{
    Executor,
    SupervisorContext,
};
use crate::tracker::TaskGuard;

/// Rolls the proxy container to a new build: deploy the replacement, then
/// retire the old instance.
pub struct UpdateProxyExecutor {
    pub arg: UpdateProxyArg,
}

#[async_trait]
impl Executor for UpdateProxyExecutor {
    type Reply = UpdateProxyReply;

    fn description(&self) -> String {
        format!("{} on {}", self.arg.sha, self.arg.host)
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<UpdateProxyReply, SupervisorError> {
        if self.arg.sha.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a sha".to_string(),
            ));
        }
        let proxy = ctx.proxy.update(&self.arg.host, &self.arg.sha).await?;
        Ok(UpdateProxyReply {
            status: Status::Ok,
            proxy: Some(proxy),
        })
    }
}

pub struct GetProxyExecutor {
    pub arg: GetProxyArg,
}

#[async_trait]
impl Executor for GetProxyExecutor {
    type Reply = GetProxyReply;

    fn description(&self) -> String {
        "GetProxy".to_string()
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<GetProxyReply, SupervisorError> {
        Ok(GetProxyReply {
            proxy: ctx.proxy.get().await,
            status: Status::Ok,
        })
    }
}

/// Pushes a full listener map to the live proxy's configuration API.
pub struct ConfigureProxyExecutor {
    pub arg: ConfigureProxyArg,
}

#[async_trait]
impl Executor for ConfigureProxyExecutor {
    type Reply = ConfigureProxyReply;

    fn description(&self) -> String {
        format!("{} proxies", self.arg.proxy_config.len())
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<ConfigureProxyReply, SupervisorError> {
        ctx.proxy.configure(&self.arg.proxy_config).await?;
        Ok(ConfigureProxyReply { status: Status::Ok })
    }
}
