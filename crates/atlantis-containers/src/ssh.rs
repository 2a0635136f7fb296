use atlantis_commons::{
    Container,
    SupervisorError,
};
use log::{
    error,
    info,
};
use tokio::process::Command;

use crate::runtime::pretending;

const MASTER_IDENTITY: &str = "/opt/atlantis/supervisor/master_id_rsa";

/// One ssh invocation into a container's sshd, addressed by its host-bound
/// ssh port.
struct SshCmd(Vec<String>);

impl SshCmd {
    fn for_container(container: &Container, remote_command: String) -> Self {
        SshCmd(vec![
            "-p".to_string(),
            container.ssh_port.to_string(),
            "-i".to_string(),
            MASTER_IDENTITY.to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "root@localhost".to_string(),
            remote_command,
        ])
    }

    async fn execute(self) -> Result<(), SupervisorError> {
        if pretending() {
            info!("[pretend] ssh {}", self.0.join(" "));
            return Ok(());
        }
        info!("ssh {}", self.0.join(" "));
        let output = Command::new("ssh").args(&self.0).output().await?;
        if !output.status.success() {
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("-> Error: {detail}");
            return Err(SupervisorError::Runtime(format!("ssh failed: {detail}")));
        }
        Ok(())
    }
}

/// Installs the user's public key and rebuilds authorized_keys inside the
/// container.
pub async fn authorize_ssh_user(
    container: &Container, user: &str, public_key: &str,
) -> Result<(), SupervisorError> {
    SshCmd::for_container(
        container,
        format!(
            "echo \"{public_key}\" >/root/.ssh/authorized_keys.d/{user}.pub && rebuild_authorized_keys"
        ),
    )
    .execute()
    .await
}

pub async fn deauthorize_ssh_user(
    container: &Container, user: &str,
) -> Result<(), SupervisorError> {
    SshCmd::for_container(
        container,
        format!("rm /root/.ssh/authorized_keys.d/{user}.pub && rebuild_authorized_keys"),
    )
    .execute()
    .await
}

/// Flags (or unflags) in-container maintenance via the marker file the app
/// stack watches.
pub async fn set_maintenance(
    container: &Container, maintenance: bool,
) -> Result<(), SupervisorError> {
    let remote_command = if maintenance {
        "touch /etc/maint".to_string()
    } else {
        "rm -f /etc/maint".to_string()
    };
    SshCmd::for_container(container, remote_command).execute().await
}
