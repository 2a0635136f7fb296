use async_trait::async_trait;
use atlantis_commons::models::rpc::{
    GetArg,
    GetReply,
    ListArg,
    ListReply,
    Status,
};
use atlantis_commons::SupervisorError;

use crate::rpc::{
    Executor,
    SupervisorContext,
};
use crate::tracker::TaskGuard;

pub struct GetExecutor {
    pub arg: GetArg,
}

#[async_trait]
impl Executor for GetExecutor {
    type Reply = GetReply;

    fn description(&self) -> String {
        self.arg.container_id.clone()
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<GetReply, SupervisorError> {
        match ctx.manager.get(&self.arg.container_id).await {
            Some(container) => Ok(GetReply {
                container: Some(container),
                status: Status::Ok,
            }),
            None => Err(SupervisorError::UnknownContainer(
                self.arg.container_id.clone(),
            )),
        }
    }
}

/// Lists deployed containers and the free ports. Both sides of the reply
/// are copies; callers can mutate them freely.
pub struct ListExecutor {
    pub arg: ListArg,
}

#[async_trait]
impl Executor for ListExecutor {
    type Reply = ListReply;

    fn description(&self) -> String {
        "List".to_string()
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<ListReply, SupervisorError> {
        let (containers, unused_ports) = ctx.manager.list().await;
        Ok(ListReply {
            containers,
            unused_ports,
        })
    }
}
