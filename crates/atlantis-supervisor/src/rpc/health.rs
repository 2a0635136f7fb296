use async_trait::async_trait;
use atlantis_commons::models::rpc::{
    HealthCheckArg,
    HealthCheckReply,
    Status,
};
use atlantis_commons::SupervisorError;
use log::info;

use crate::rpc::{
    Executor,
    SupervisorContext,
};
use crate::tracker::TaskGuard;

/// Reports the region, zone, and the three resource triples, classified as
/// OK, Full, or Maintenance.
pub struct HealthCheckExecutor {
    pub arg: HealthCheckArg,
}

#[async_trait]
impl Executor for HealthCheckExecutor {
    type Reply = HealthCheckReply;

    fn description(&self) -> String {
        "HealthCheck".to_string()
    }

    fn allow_during_maintenance(&self) -> bool {
        true
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<HealthCheckReply, SupervisorError> {
        let (containers, cpu_shares, memory, resource_status) =
            ctx.manager.health_status().await;
        let status = if ctx.tracker.under_maintenance() {
            Status::Maintenance
        } else {
            resource_status
        };
        info!(
            "-> containers: {} total, {} used, {} free; status: {status}",
            containers.total, containers.used, containers.free
        );
        Ok(HealthCheckReply {
            containers,
            cpu_shares,
            memory,
            region: ctx.region.clone(),
            zone: ctx.zone.clone(),
            status,
        })
    }
}
