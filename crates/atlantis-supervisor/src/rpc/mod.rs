pub mod container;
pub mod deploy;
pub mod health;
pub mod ipgroup;
pub mod maintenance;
pub mod proxy;
pub mod ssh;
pub mod version;

use std::sync::Arc;

use async_trait::async_trait;
use atlantis_commons::SupervisorError;
use atlantis_containers::{
    ManagerHandle,
    ProxySupervisor,
};
use log::{
    error,
    info,
};

use crate::tracker::{
    TaskGuard,
    TaskTracker,
};

/// Everything an operation may touch. Cloned per connection; the interior
/// handles are all cheap fronts over shared state.
pub struct SupervisorContext {
    pub manager: ManagerHandle,
    pub proxy: Arc<ProxySupervisor>,
    pub tracker: TaskTracker,
    pub region: String,
    pub zone: String,
}

/// One typed operation. `execute` receives the running task so operations
/// like Idle can reason about the rest of the in-flight set.
#[async_trait]
pub trait Executor: Send {
    type Reply;

    fn description(&self) -> String;

    fn authorize(&self) -> Result<(), SupervisorError> {
        Ok(())
    }

    fn allow_during_maintenance(&self) -> bool {
        false
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, task: &TaskGuard,
    ) -> Result<Self::Reply, SupervisorError>;
}

/// Wraps an executor in a tracked task: the maintenance gate, the
/// authorization hook, registration for the idle signal, and outcome
/// logging.
pub async fn run_task<E: Executor>(
    name: &str, mut executor: E, ctx: &SupervisorContext,
) -> Result<E::Reply, SupervisorError> {
    if ctx.tracker.under_maintenance() && !executor.allow_during_maintenance() {
        return Err(SupervisorError::Maintenance);
    }
    executor.authorize()?;
    let task = ctx.tracker.register(name);
    info!("[RPC][{name}] {}", executor.description());
    match executor.execute(ctx, &task).await {
        Ok(reply) => Ok(reply),
        Err(err) => {
            error!("[RPC][{name}] -> {err}");
            Err(err)
        }
    }
}
