use std::collections::{
    BTreeSet,
    HashMap,
};

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

use crate::utils::error::SupervisorError;

/// One declared service dependency: the egress policy it needs (ip-group
/// name to allowed destination ports) and its opaque configuration payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppDep {
    #[serde(default)]
    pub security_group: HashMap<String, Vec<u16>>,
    #[serde(default)]
    pub encrypted_data: String,
}

/// The resolved application manifest used for reservation and deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instances: u32,
    pub cpu_shares: u32,
    pub memory_limit: u32,
    #[serde(default)]
    pub app_type: String,
    #[serde(default)]
    pub java_type: String,
    #[serde(default)]
    pub run_commands: Vec<String>,
    #[serde(default)]
    pub deps: HashMap<String, AppDep>,
}

impl Manifest {
    /// Flattens `deps[*].security_group` into one group -> ports map,
    /// deduplicating ports per group. Ports come back sorted so rule
    /// generation is deterministic.
    pub fn security_groups(&self) -> HashMap<String, Vec<u16>> {
        let mut merged: HashMap<String, BTreeSet<u16>> = HashMap::new();
        for dep in self.deps.values() {
            for (group, ports) in &dep.security_group {
                merged.entry(group.clone()).or_default().extend(ports);
            }
        }
        merged
            .into_iter()
            .map(|(group, ports)| (group, ports.into_iter().collect()))
            .collect()
    }

    pub fn dep_names(&self) -> Vec<String> {
        self.deps.keys().cloned().collect()
    }
}

/// The declarative manifest form as submitted by clients. `run_command`
/// accepts either a single string or a list of strings; anything else is
/// rejected during resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSource {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instances: u32,
    pub cpu_shares: u32,
    pub memory_limit: u32,
    #[serde(default)]
    pub app_type: String,
    #[serde(default)]
    pub java_type: String,
    #[serde(default)]
    pub run_command: Value,
    #[serde(default, rename = "dependencies")]
    pub dep_names: Vec<String>,
}

impl ManifestSource {
    pub fn resolve(self) -> Result<Manifest, SupervisorError> {
        let run_commands = match self.run_command {
            Value::Null => vec![],
            Value::String(cmd) => vec![cmd],
            Value::Array(items) => {
                let mut cmds = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(cmd) => cmds.push(cmd),
                        other => {
                            return Err(SupervisorError::ManifestInvalid(format!(
                                "non-string element in run_command array: {other}"
                            )))
                        }
                    }
                }
                cmds
            }
            other => {
                return Err(SupervisorError::ManifestInvalid(format!(
                    "run_command should be a string or a list of strings, got {other}"
                )))
            }
        };
        let deps = self
            .dep_names
            .into_iter()
            .map(|name| (name, AppDep::default()))
            .collect();
        Ok(Manifest {
            name: self.name,
            description: self.description,
            instances: self.instances,
            cpu_shares: self.cpu_shares,
            memory_limit: self.memory_limit,
            app_type: self.app_type,
            java_type: self.java_type,
            run_commands,
            deps,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn source(run_command: Value) -> ManifestSource {
        serde_json::from_value(json!({
            "name": "myapp",
            "cpu_shares": 2,
            "memory_limit": 256,
            "run_command": run_command,
            "dependencies": ["db", "cache"],
        }))
        .unwrap()
    }

    #[test]
    fn resolve_accepts_string_run_command() {
        let manifest = source(json!("bin/run")).resolve().unwrap();
        assert_eq!(manifest.run_commands, vec!["bin/run".to_string()]);
        assert_eq!(manifest.dep_names().len(), 2);
    }

    #[test]
    fn resolve_accepts_string_list_run_command() {
        let manifest = source(json!(["setup", "bin/run"])).resolve().unwrap();
        assert_eq!(
            manifest.run_commands,
            vec!["setup".to_string(), "bin/run".to_string()]
        );
    }

    #[test]
    fn resolve_rejects_non_string_run_command() {
        let err = source(json!(42)).resolve().unwrap_err();
        assert!(matches!(err, SupervisorError::ManifestInvalid(_)));

        let err = source(json!(["ok", 1])).resolve().unwrap_err();
        assert!(matches!(err, SupervisorError::ManifestInvalid(_)));
    }

    #[test]
    fn security_groups_flatten_and_dedup() {
        let mut manifest = source(json!("run")).resolve().unwrap();
        manifest.deps.insert(
            "db".to_string(),
            AppDep {
                security_group: HashMap::from([(
                    "internal".to_string(),
                    vec![5432, 80],
                )]),
                encrypted_data: String::new(),
            },
        );
        manifest.deps.insert(
            "cache".to_string(),
            AppDep {
                security_group: HashMap::from([
                    ("internal".to_string(), vec![80, 6379]),
                    ("external".to_string(), vec![443]),
                ]),
                encrypted_data: String::new(),
            },
        );

        let sgs = manifest.security_groups();
        assert_eq!(sgs["internal"], vec![80, 5432, 6379]);
        assert_eq!(sgs["external"], vec![443]);
    }
}
