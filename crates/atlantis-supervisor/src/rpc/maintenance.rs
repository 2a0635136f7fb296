use async_trait::async_trait;
use atlantis_commons::models::rpc::{
    ContainerMaintenanceArg,
    ContainerMaintenanceReply,
    IdleArg,
    IdleReply,
    Status,
};
use atlantis_commons::SupervisorError;
use atlantis_containers::ssh;

use crate::rpc::{
    Executor,
    SupervisorContext,
};
use crate::tracker::TaskGuard;

/// Flags maintenance inside one container (distinct from supervisor-wide
/// maintenance, which is the tracker's file flag).
pub struct ContainerMaintenanceExecutor {
    pub arg: ContainerMaintenanceArg,
}

#[async_trait]
impl Executor for ContainerMaintenanceExecutor {
    type Reply = ContainerMaintenanceReply;

    fn description(&self) -> String {
        format!("{} : {}", self.arg.container_id, self.arg.maintenance)
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<ContainerMaintenanceReply, SupervisorError> {
        if self.arg.container_id.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a container id".to_string(),
            ));
        }
        let Some(container) = ctx.manager.get(&self.arg.container_id).await else {
            return Err(SupervisorError::UnknownContainer(
                self.arg.container_id.clone(),
            ));
        };
        ssh::set_maintenance(&container, self.arg.maintenance).await?;
        Ok(ContainerMaintenanceReply { status: Status::Ok })
    }
}

/// Anyone may ask whether the supervisor is idle, even during maintenance;
/// the asking task itself does not count.
pub struct IdleExecutor {
    pub arg: IdleArg,
}

#[async_trait]
impl Executor for IdleExecutor {
    type Reply = IdleReply;

    fn description(&self) -> String {
        "Idle?".to_string()
    }

    fn allow_during_maintenance(&self) -> bool {
        true
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, task: &TaskGuard,
    ) -> Result<IdleReply, SupervisorError> {
        Ok(IdleReply {
            idle: ctx.tracker.idle_except(task.id()),
            status: Status::Ok,
        })
    }
}
