use async_trait::async_trait;
use atlantis_commons::models::rpc::{
    Status,
    VersionArg,
    VersionReply,
};
use atlantis_commons::SupervisorError;

use crate::config::RPC_VERSION;
use crate::rpc::{
    Executor,
    SupervisorContext,
};
use crate::tracker::TaskGuard;

pub struct VersionExecutor {
    pub arg: VersionArg,
}

#[async_trait]
impl Executor for VersionExecutor {
    type Reply = VersionReply;

    fn description(&self) -> String {
        "Version".to_string()
    }

    fn allow_during_maintenance(&self) -> bool {
        true
    }

    async fn execute(
        &mut self, _ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<VersionReply, SupervisorError> {
        Ok(VersionReply {
            rpc_version: RPC_VERSION.to_string(),
            status: Status::Ok,
        })
    }
}
