use std::collections::HashMap;
use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

use crate::models::container::{
    Container,
    ProxyContainer,
    ResourceStats,
};
use crate::models::manifest::Manifest;
use crate::models::proxy::ProxyConfig;

/// Outcome classification carried in every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Error,
    Full,
    Maintenance,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Error => write!(f, "Error"),
            Status::Full => write!(f, "Full"),
            Status::Maintenance => write!(f, "Maintenance"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckArg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckReply {
    pub containers: ResourceStats,
    pub cpu_shares: ResourceStats,
    pub memory: ResourceStats,
    pub region: String,
    pub zone: String,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployArg {
    pub host: String,
    pub app: String,
    pub sha: String,
    pub env: String,
    pub container_id: String,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReply {
    pub status: Status,
    pub container: Option<Container>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeardownArg {
    #[serde(default)]
    pub container_ids: Vec<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownReply {
    /// The ids that were actually torn down.
    pub container_ids: Vec<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetArg {
    pub container_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReply {
    pub container: Option<Container>,
    pub status: Status,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListArg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListReply {
    pub containers: HashMap<String, Container>,
    pub unused_ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeSshArg {
    pub container_id: String,
    pub user: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeSshReply {
    pub port: u16,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeauthorizeSshArg {
    pub container_id: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeauthorizeSshReply {
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMaintenanceArg {
    pub container_id: String,
    pub maintenance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMaintenanceReply {
    pub status: Status,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdleArg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleReply {
    pub idle: bool,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateIpGroupArg {
    pub name: String,
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateIpGroupReply {
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteIpGroupArg {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteIpGroupReply {
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProxyArg {
    pub host: String,
    pub sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProxyReply {
    pub status: Status,
    pub proxy: Option<ProxyContainer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetProxyArg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProxyReply {
    pub proxy: Option<ProxyContainer>,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureProxyArg {
    pub proxy_config: HashMap<String, ProxyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureProxyReply {
    pub status: Status,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionArg {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionReply {
    pub rpc_version: String,
    pub status: Status,
}

/// Every operation the supervisor accepts, with its typed argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg")]
pub enum SupervisorCommand {
    HealthCheck(HealthCheckArg),
    Deploy(DeployArg),
    Teardown(TeardownArg),
    Get(GetArg),
    List(ListArg),
    AuthorizeSsh(AuthorizeSshArg),
    DeauthorizeSsh(DeauthorizeSshArg),
    ContainerMaintenance(ContainerMaintenanceArg),
    Idle(IdleArg),
    UpdateIpGroup(UpdateIpGroupArg),
    DeleteIpGroup(DeleteIpGroupArg),
    UpdateProxy(UpdateProxyArg),
    GetProxy(GetProxyArg),
    ConfigureProxy(ConfigureProxyArg),
    Version(VersionArg),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "reply")]
pub enum SupervisorResult {
    HealthCheck(HealthCheckReply),
    Deploy(DeployReply),
    Teardown(TeardownReply),
    Get(GetReply),
    List(ListReply),
    AuthorizeSsh(AuthorizeSshReply),
    DeauthorizeSsh(DeauthorizeSshReply),
    ContainerMaintenance(ContainerMaintenanceReply),
    Idle(IdleReply),
    UpdateIpGroup(UpdateIpGroupReply),
    DeleteIpGroup(DeleteIpGroupReply),
    UpdateProxy(UpdateProxyReply),
    GetProxy(GetProxyReply),
    ConfigureProxy(ConfigureProxyReply),
    Version(VersionReply),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorRequest {
    pub request_id: String,
    pub command: SupervisorCommand,
}

impl SupervisorRequest {
    pub fn new(command: SupervisorCommand) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            command,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SupervisorResult>,
}

impl SupervisorResponse {
    pub fn success(request_id: String, result: SupervisorResult) -> Self {
        Self {
            request_id,
            error: None,
            result: Some(result),
        }
    }

    pub fn failure(request_id: String, error: impl Into<String>) -> Self {
        Self {
            request_id,
            error: Some(error.into()),
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_envelope_round_trips() {
        let request = SupervisorRequest::new(SupervisorCommand::Teardown(TeardownArg {
            container_ids: vec!["ghost".to_string(), "real".to_string()],
            all: false,
        }));
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: SupervisorRequest = serde_json::from_str(&encoded).unwrap();
        match decoded.command {
            SupervisorCommand::Teardown(arg) => {
                assert_eq!(arg.container_ids, vec!["ghost", "real"]);
                assert!(!arg.all);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn status_strings_match_wire_format() {
        assert_eq!(Status::Ok.to_string(), "OK");
        assert_eq!(Status::Full.to_string(), "Full");
        assert_eq!(Status::Maintenance.to_string(), "Maintenance");
        assert_eq!(Status::Error.to_string(), "Error");
    }
}
