use async_trait::async_trait;
use atlantis_commons::models::rpc::{
    AuthorizeSshArg,
    AuthorizeSshReply,
    DeauthorizeSshArg,
    DeauthorizeSshReply,
    Status,
};
use atlantis_commons::SupervisorError;
use atlantis_containers::ssh;
use log::info;

use crate::rpc::{
    Executor,
    SupervisorContext,
};
use crate::tracker::TaskGuard;

pub struct AuthorizeSshExecutor {
    pub arg: AuthorizeSshArg,
}

#[async_trait]
impl Executor for AuthorizeSshExecutor {
    type Reply = AuthorizeSshReply;

    fn description(&self) -> String {
        format!("{} @ {}", self.arg.user, self.arg.container_id)
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<AuthorizeSshReply, SupervisorError> {
        if self.arg.public_key.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify an SSH public key".to_string(),
            ));
        }
        if self.arg.container_id.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a container id".to_string(),
            ));
        }
        if self.arg.user.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a user".to_string(),
            ));
        }
        let Some(container) = ctx.manager.get(&self.arg.container_id).await else {
            return Err(SupervisorError::UnknownContainer(
                self.arg.container_id.clone(),
            ));
        };
        ssh::authorize_ssh_user(&container, &self.arg.user, &self.arg.public_key).await?;
        info!("[RPC][AuthorizeSSH] authorized {}", container.ssh_port);
        Ok(AuthorizeSshReply {
            port: container.ssh_port,
            status: Status::Ok,
        })
    }
}

pub struct DeauthorizeSshExecutor {
    pub arg: DeauthorizeSshArg,
}

#[async_trait]
impl Executor for DeauthorizeSshExecutor {
    type Reply = DeauthorizeSshReply;

    fn description(&self) -> String {
        format!("{} @ {}", self.arg.user, self.arg.container_id)
    }

    async fn execute(
        &mut self, ctx: &SupervisorContext, _task: &TaskGuard,
    ) -> Result<DeauthorizeSshReply, SupervisorError> {
        if self.arg.container_id.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a container id".to_string(),
            ));
        }
        if self.arg.user.is_empty() {
            return Err(SupervisorError::ManifestInvalid(
                "please specify a user".to_string(),
            ));
        }
        let Some(container) = ctx.manager.get(&self.arg.container_id).await else {
            return Err(SupervisorError::UnknownContainer(
                self.arg.container_id.clone(),
            ));
        };
        ssh::deauthorize_ssh_user(&container, &self.arg.user).await?;
        Ok(DeauthorizeSshReply { status: Status::Ok })
    }
}
