use std::collections::HashMap;
use std::time::Duration;

use atlantis_commons::SupervisorError;
use log::{
    info,
    warn,
};
use serde::{
    Deserialize,
    Serialize,
};
use tokio::process::Command;

/// External helper that maps a container PID to its (fwmark, veth) pair.
const NETWORK_HELPER: &str = "guano";
const PHYS_INTERFACE: &str = "eth0";
const RESOLVE_ATTEMPTS: u32 = 5;
const RESOLVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-container packet-filter state: the host-side veth, the fwmark
/// stamped on its traffic, and the effective group -> ports policy. Lives
/// exactly as long as the owning container's registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSecurity {
    pub id: String,
    pub pid: i64,
    pub veth: String,
    pub mark: String,
    pub security_groups: HashMap<String, Vec<u16>>,
}

/// Resolves (mark, veth) for a container PID. The helper can briefly race
/// container startup, so a handful of retries paper over the window.
pub async fn resolve_network_info(
    pid: i64, pretend: bool,
) -> Result<(String, String), SupervisorError> {
    if pretend {
        info!("[pretend] {NETWORK_HELPER} {pid} {PHYS_INTERFACE}");
        return Ok((format!("{}", pid + 1), format!("vethp{pid}")));
    }
    let mut last_error = String::new();
    for attempt in 1..=RESOLVE_ATTEMPTS {
        match Command::new(NETWORK_HELPER)
            .arg(pid.to_string())
            .arg(PHYS_INTERFACE)
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let mut parts = stdout.split_whitespace();
                if let (Some(mark), Some(veth), None) =
                    (parts.next(), parts.next(), parts.next())
                {
                    return Ok((mark.to_string(), veth.to_string()));
                }
                last_error = format!("unparseable helper output: {}", stdout.trim());
            }
            Ok(output) => {
                last_error = String::from_utf8_lossy(&output.stderr).trim().to_string();
            }
            Err(err) => last_error = err.to_string(),
        }
        warn!(
            "could not resolve network info for pid {pid} (attempt {attempt}/{RESOLVE_ATTEMPTS}): {last_error}"
        );
        if attempt < RESOLVE_ATTEMPTS {
            tokio::time::sleep(RESOLVE_RETRY_DELAY).await;
        }
    }
    Err(SupervisorError::Netsec(format!(
        "could not resolve network info for pid {pid}: {last_error}"
    )))
}
