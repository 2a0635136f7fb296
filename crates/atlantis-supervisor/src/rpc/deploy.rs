use async_trait::async_trait;
use atlantis_commons::models::rpc::{
    DeployArg,
    DeployReply,
    Status,
    TeardownArg,
    TeardownReply,
};
use atlantis_commons::SupervisorError;
use log::info;

use crate::rpc::{
    Executor,
    SupervisorContext,
};
use crate::tracker::TaskGuard;

/// Reserves a slot and drives the container through deploy. A failed deploy
/// tears its reservation down before the error reaches the caller.
pub struct DeployExecutor {
    pub arg: DeployArg,
}

#[async_trait]
impl Executor for DeployExecutor {
    type Reply = DeployReply;

    fn description(&self) -> String {
        format!(
            "{} @ {} in {} on {} -> {} with cpu {} and mem {}",
            self.arg.app,
            self.arg.sha,
            self.arg.env,
            self.arg.host,
            self.arg.container_id,
            self.arg.manifest.cpu_shares,
            self.arg.manifest.memory_limit
        )
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<DeployReply, SupervisorError> {
        if self.arg.app.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify an app".to_string(),
            ));
        }
        if self.arg.sha.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a sha".to_string(),
            ));
        }
        if self.arg.container_id.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a container id".to_string(),
            ));
        }
        if self.arg.manifest.cpu_shares == 0 {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a number of CPU shares".to_string(),
            ));
        }
        if self.arg.manifest.memory_limit == 0 {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a memory limit".to_string(),
            ));
        }

        ctx.manager
            .reserve(&self.arg.container_id, self.arg.manifest.clone())
            .await?;
        let container = ctx
            .manager
            .deploy(
                &self.arg.container_id,
                &self.arg.host,
                &self.arg.app,
                &self.arg.sha,
                &self.arg.env,
            )
            .await?;
        Ok(DeployReply {
            status: Status::Ok,
            container: Some(container),
        })
    }
}

/// Tears down the named containers, or every live container with
/// `all = true`. Partial misses are reported in the reply, not as a hard
/// failure, so sweeping a half-known list still tears down what it can.
pub struct TeardownExecutor {
    pub arg: TeardownArg,
}

#[async_trait]
impl Executor for TeardownExecutor {
    type Reply = TeardownReply;

    fn description(&self) -> String {
        format!("{:?}, all: {}", self.arg.container_ids, self.arg.all)
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<TeardownReply, SupervisorError> {
        if self.arg.container_ids.is_empty() && !self.arg.all {
            return Err(SupervisorError::ManifestInvalid(
                "please specify container ids or all".to_string(),
            ));
        }
        let container_ids = if self.arg.all {
            // Snapshot the live map; teardown iterates over the copy.
            let (containers, _) = ctx.manager.list().await;
            let ids: Vec<String> = containers.into_keys().collect();
            for id in &ids {
                info!("-> found container {id}");
            }
            ids
        } else {
            self.arg.container_ids.clone()
        };

        let mut torn = Vec::new();
        let mut missing = Vec::new();
        for container_id in container_ids {
            if ctx.manager.teardown(&container_id).await {
                torn.push(container_id);
            } else {
                info!("-> no such container: {container_id}");
                missing.push(format!("no such container: {container_id}"));
            }
        }
        let (status, message) = if missing.is_empty() {
            (Status::Ok, None)
        } else {
            (Status::Error, Some(missing.join("\n")))
        };
        Ok(TeardownReply {
            container_ids: torn,
            status,
            message,
        })
    }
}
