use async_trait::async_trait;
use atlantis_commons::models::rpc::{
    DeleteIpGroupArg,
    DeleteIpGroupReply,
    Status,
    UpdateIpGroupArg,
    UpdateIpGroupReply,
};
use atlantis_commons::SupervisorError;

use crate::rpc::{
    Executor,
    SupervisorContext,
};
use crate::tracker::TaskGuard;

pub struct UpdateIpGroupExecutor {
    pub arg: UpdateIpGroupArg,
}

#[async_trait]
impl Executor for UpdateIpGroupExecutor {
    type Reply = UpdateIpGroupReply;

    fn description(&self) -> String {
        format!("{} -> {:?}", self.arg.name, self.arg.ips)
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<UpdateIpGroupReply, SupervisorError> {
        if self.arg.name.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a name".to_string(),
            ));
        }
        ctx.manager
            .netsec()
            .update_ip_group(&self.arg.name, &self.arg.ips)
            .await?;
        Ok(UpdateIpGroupReply { status: Status::Ok })
    }
}

pub struct DeleteIpGroupExecutor {
    pub arg: DeleteIpGroupArg,
}

#[async_trait]
impl Executor for DeleteIpGroupExecutor {
    type Reply = DeleteIpGroupReply;

    fn description(&self) -> String {
        self.arg.name.clone()
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<DeleteIpGroupReply, SupervisorError> {
        if self.arg.name.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a name".to_string(),
            ));
        }
        ctx.manager.netsec().delete_ip_group(&self.arg.name).await?;
        Ok(DeleteIpGroupReply { status: Status::Ok })
    }
}
