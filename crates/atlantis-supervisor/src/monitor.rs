use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use atlantis_commons::{
    Container,
    SupervisorError,
};
use tokio::process::Command;
use tokio::task::JoinSet;

/// Nagios-style check states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl CheckState {
    pub fn code(self) -> u8 {
        match self {
            CheckState::Ok => 0,
            CheckState::Warning => 1,
            CheckState::Critical => 2,
            CheckState::Unknown => 3,
        }
    }
}

/// One check outcome, printed as `<state> <service> - <detail>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub state: CheckState,
    pub service: String,
    pub detail: String,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} - {}", self.state.code(), self.service, self.detail)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// The supervisor's persisted container map.
    pub container_file: PathBuf,
    /// Directory of check scripts inside each container.
    pub check_dir: String,
    pub ssh_user: String,
    pub ssh_identity: String,
    /// Service name the sweep itself reports under.
    pub check_name: String,
    /// Per-check budget; an expired check is synthesized as Critical
    /// instead of blocking the sweep.
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            container_file: PathBuf::from("/etc/atlantis/supervisor/save/containers"),
            check_dir: "/check_mk_checks".to_string(),
            ssh_user: "root".to_string(),
            ssh_identity: "/opt/atlantis/supervisor/master_id_rsa".to_string(),
            check_name: "ContainerMonitor".to_string(),
            timeout: Duration::from_secs(110),
        }
    }
}

/// Sweeps every persisted container: discover its check scripts over ssh,
/// run each with the per-check timeout, and collect the result lines.
pub async fn run_sweep(config: &MonitorConfig) -> Result<Vec<CheckResult>, SupervisorError> {
    let raw = match tokio::fs::read(&config.container_file).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(vec![CheckResult {
                state: CheckState::Ok,
                service: config.check_name.clone(),
                detail: format!(
                    "Container file does not exist at {}. Likely no live containers present.",
                    config.container_file.display()
                ),
            }]);
        }
        Err(err) => return Err(err.into()),
    };
    let containers: HashMap<String, Container> = serde_json::from_slice(&raw)?;

    let mut sweeps = JoinSet::new();
    for (_, mut container) in containers {
        if container.host.is_empty() {
            container.host = "localhost".to_string();
        }
        let config = config.clone();
        sweeps.spawn(async move { check_container(&config, &container).await });
    }
    let mut results = Vec::new();
    while let Some(joined) = sweeps.join_next().await {
        if let Ok(mut container_results) = joined {
            results.append(&mut container_results);
        }
    }
    Ok(results)
}

async fn check_container(config: &MonitorConfig, container: &Container) -> Vec<CheckResult> {
    let monitor_service = format!("{}_{}", config.check_name, container.id);
    let listing = ssh_output(
        config,
        container,
        format!("ls {}", config.check_dir),
    )
    .await;
    let listing = match listing {
        Ok(listing) => listing,
        Err(err) => {
            return vec![CheckResult {
                state: CheckState::Critical,
                service: monitor_service,
                detail: format!("Error getting checks for container: {err}"),
            }];
        }
    };

    let mut results = vec![CheckResult {
        state: CheckState::Ok,
        service: monitor_service,
        detail: "Got checks for container".to_string(),
    }];
    let scripts: Vec<&str> = listing
        .split_whitespace()
        .filter(|script| !script.is_empty())
        .collect();
    if scripts.is_empty() {
        // nothing to check on this container
        return results;
    }

    let mut checks = JoinSet::new();
    for script in scripts {
        let service = service_name(script, &container.id);
        let command = format!(
            "{}/{} {} {}",
            config.check_dir, script, container.primary_port, container.id
        );
        let config = config.clone();
        let container = container.clone();
        let timeout = config.timeout;
        checks.spawn(async move {
            let check = run_service_check(config, container, service.clone(), command);
            check_with_timeout(&service, check, timeout).await
        });
    }
    while let Some(joined) = checks.join_next().await {
        if let Ok(result) = joined {
            results.push(result);
        }
    }
    results
}

/// Races one check against its budget; on expiry the result is a
/// synthesized Critical rather than a stalled sweep.
pub async fn check_with_timeout<F>(service: &str, check: F, budget: Duration) -> CheckResult
where
    F: Future<Output = CheckResult>,
{
    match tokio::time::timeout(budget, check).await {
        Ok(result) => result,
        Err(_) => CheckResult {
            state: CheckState::Critical,
            service: service.to_string(),
            detail: "Timeout occured during check".to_string(),
        },
    }
}

async fn run_service_check(
    config: MonitorConfig, container: Container, service: String, command: String,
) -> CheckResult {
    match ssh_output(&config, &container, command).await {
        Ok(output) => validate(&service, &output),
        Err(err) => CheckResult {
            state: CheckState::Critical,
            service,
            detail: err.to_string(),
        },
    }
}

/// A check's stdout must be a `<state> <service> - <detail>` line naming
/// the expected service; anything else becomes a Critical result.
fn validate(service: &str, output: &str) -> CheckResult {
    let line = output.lines().next().unwrap_or("");
    let mut parts = line.splitn(4, ' ');
    let state = parts.next().and_then(|raw| raw.parse::<u8>().ok());
    let reported_service = parts.next();
    if reported_service == Some(service) {
        let state = match state {
            Some(0) => CheckState::Ok,
            Some(1) => CheckState::Warning,
            Some(2) => CheckState::Critical,
            _ => CheckState::Unknown,
        };
        let detail = parts.nth(1).unwrap_or("").to_string();
        return CheckResult {
            state,
            service: service.to_string(),
            detail,
        };
    }
    CheckResult {
        state: CheckState::Critical,
        service: service.to_string(),
        detail: "Error encountered while monitoring the service".to_string(),
    }
}

/// Script file stem plus the container id.
fn service_name(script: &str, container_id: &str) -> String {
    let stem = script.split('.').next().unwrap_or(script);
    format!("{stem}_{container_id}")
}

async fn ssh_output(
    config: &MonitorConfig, container: &Container, command: String,
) -> Result<String, SupervisorError> {
    let output = Command::new("ssh")
        .arg("-q")
        .arg(format!("{}@{}", config.ssh_user, container.host))
        .arg("-i")
        .arg(&config.ssh_identity)
        .arg("-p")
        .arg(container.ssh_port.to_string())
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg(command)
        .output()
        .await?;
    if !output.status.success() {
        return Err(SupervisorError::Runtime(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_check_is_synthesized_as_critical() {
        let result = check_with_timeout(
            "web_check_app-1",
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                CheckResult {
                    state: CheckState::Ok,
                    service: "web_check_app-1".to_string(),
                    detail: "never happens".to_string(),
                }
            },
            Duration::from_millis(20),
        )
        .await;
        assert_eq!(result.state, CheckState::Critical);
        assert_eq!(result.to_string(), "2 web_check_app-1 - Timeout occured during check");
    }

    #[tokio::test]
    async fn quick_check_passes_through() {
        let expected = CheckResult {
            state: CheckState::Ok,
            service: "svc".to_string(),
            detail: "fine".to_string(),
        };
        let result = check_with_timeout(
            "svc",
            std::future::ready(expected.clone()),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result, expected);
    }

    #[test]
    fn validate_requires_the_service_name_to_match() {
        let good = validate("web_app-1", "0 web_app-1 - all good");
        assert_eq!(good.state, CheckState::Ok);
        assert_eq!(good.detail, "all good");

        let warn = validate("web_app-1", "1 web_app-1 - degraded");
        assert_eq!(warn.state, CheckState::Warning);

        let mismatched = validate("web_app-1", "0 other_service - all good");
        assert_eq!(mismatched.state, CheckState::Critical);
    }

    #[test]
    fn service_name_strips_the_extension() {
        assert_eq!(service_name("http_check.sh", "app-1"), "http_check_app-1");
        assert_eq!(service_name("bare", "app-1"), "bare_app-1");
    }

    #[tokio::test]
    async fn absent_container_file_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            container_file: dir.path().join("containers"),
            ..Default::default()
        };
        let results = run_sweep(&config).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, CheckState::Ok);
    }
}
