use std::collections::HashMap;

use atlantis_commons::SupervisorError;
use log::info;
use tokio::process::Command;

const IPTABLES: &str = "iptables";

/// In-memory model of the filter chains, maintained only in pretend mode.
/// `-I` prepends, `-D` removes the first matching rule, mirroring what the
/// real commands do to the host tables. Tests assert on this.
#[derive(Debug, Clone, Default)]
pub struct ShadowFirewall {
    chains: HashMap<String, Vec<String>>,
}

impl ShadowFirewall {
    pub fn rules(&self, chain: &str) -> Vec<String> {
        self.chains.get(chain).cloned().unwrap_or_default()
    }

    fn apply(&mut self, args: &[String]) {
        if args.len() < 2 {
            return;
        }
        let chain = self.chains.entry(args[1].clone()).or_default();
        let rule = args[2..].join(" ");
        match args[0].as_str() {
            "-I" => chain.insert(0, rule),
            "-D" => {
                if let Some(idx) = chain.iter().position(|existing| *existing == rule) {
                    chain.remove(idx);
                }
            }
            _ => {}
        }
    }
}

/// Issues one filter-table mutation. In pretend mode the command is logged
/// and applied to the shadow table instead of the host; state transitions
/// are identical either way.
pub async fn run_rule(
    pretend: bool, shadow: &mut ShadowFirewall, args: Vec<String>,
) -> Result<(), SupervisorError> {
    if pretend {
        info!("[pretend] {} {}", IPTABLES, args.join(" "));
        shadow.apply(&args);
        return Ok(());
    }
    let output = Command::new(IPTABLES).args(&args).output().await?;
    if !output.status.success() {
        let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if detail.is_empty() {
            detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        return Err(SupervisorError::Netsec(format!(
            "{IPTABLES} {} failed: {detail}",
            args.join(" ")
        )));
    }
    Ok(())
}

fn action(add: bool) -> String {
    if add { "-I" } else { "-D" }.to_string()
}

pub fn blanket_deny_args(add: bool, ip: &str) -> Vec<String> {
    vec![
        action(add),
        "FORWARD".to_string(),
        "-d".to_string(),
        ip.to_string(),
        "-j".to_string(),
        "REJECT".to_string(),
    ]
}

pub fn conntrack_args(add: bool) -> Vec<String> {
    vec![
        action(add),
        "FORWARD".to_string(),
        "-m".to_string(),
        "conntrack".to_string(),
        "--ctstate".to_string(),
        "RELATED,ESTABLISHED".to_string(),
        "-j".to_string(),
        "ACCEPT".to_string(),
    ]
}

pub fn open_port_args(add: bool, mark: &str, ip: &str, port: u16) -> Vec<String> {
    vec![
        action(add),
        "FORWARD".to_string(),
        "-d".to_string(),
        ip.to_string(),
        "-p".to_string(),
        "tcp".to_string(),
        "--dport".to_string(),
        port.to_string(),
        "-m".to_string(),
        "mark".to_string(),
        "--mark".to_string(),
        mark.to_string(),
        "-j".to_string(),
        "ACCEPT".to_string(),
    ]
}

pub fn mark_veth_args(add: bool, veth: &str, mark: &str) -> Vec<String> {
    vec![
        action(add),
        "PREROUTING".to_string(),
        "-t".to_string(),
        "mangle".to_string(),
        "-m".to_string(),
        "physdev".to_string(),
        "--physdev-in".to_string(),
        veth.to_string(),
        "-j".to_string(),
        "MARK".to_string(),
        "--set-mark".to_string(),
        mark.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_prepends_and_delete_removes_first_match() {
        let mut shadow = ShadowFirewall::default();
        run_rule(true, &mut shadow, blanket_deny_args(true, "1.1.1.1"))
            .await
            .unwrap();
        run_rule(true, &mut shadow, blanket_deny_args(true, "2.2.2.2"))
            .await
            .unwrap();

        let rules = shadow.rules("FORWARD");
        assert_eq!(rules.len(), 2);
        assert!(rules[0].contains("2.2.2.2"), "newest rule sits on top");

        run_rule(true, &mut shadow, blanket_deny_args(false, "2.2.2.2"))
            .await
            .unwrap();
        let rules = shadow.rules("FORWARD");
        assert_eq!(rules.len(), 1);
        assert!(rules[0].contains("1.1.1.1"));
    }

    #[tokio::test]
    async fn mangle_rules_land_in_their_own_chain() {
        let mut shadow = ShadowFirewall::default();
        run_rule(true, &mut shadow, mark_veth_args(true, "vethab12", "77"))
            .await
            .unwrap();
        assert!(shadow.rules("FORWARD").is_empty());
        assert_eq!(shadow.rules("PREROUTING").len(), 1);
        assert!(shadow.rules("PREROUTING")[0].contains("--physdev-in vethab12"));
    }
}
