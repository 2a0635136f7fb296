use std::collections::{
    HashMap,
    HashSet,
};

use atlantis_commons::{
    Serializer,
    SupervisorError,
};
use log::{
    debug,
    error,
    info,
};
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::Mutex;

use crate::command::{
    blanket_deny_args,
    conntrack_args,
    mark_veth_args,
    open_port_args,
    run_rule,
    ShadowFirewall,
};
use crate::contsec::{
    resolve_network_info,
    ContainerSecurity,
};

pub const NETSEC_FILE: &str = "netsec";

/// The persisted shadow of the host filter tables. This state is
/// authoritative: a command is issued iff a transition here says the rule
/// set must change.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NetsecState {
    denied_ips: HashSet<String>,
    ip_groups: HashMap<String, Vec<String>>,
    containers: HashMap<String, ContainerSecurity>,
    pretend: bool,
    #[serde(skip)]
    shadow: ShadowFirewall,
}

/// Stateful manager of the host packet-filter rules. Operations may be
/// invoked concurrently; the internal mutex fully serializes them.
#[derive(Debug)]
pub struct NetworkSecurity {
    state: Mutex<NetsecState>,
    serializer: Serializer,
}

impl NetworkSecurity {
    /// A fresh, wide-open controller. Installs the conntrack bypass so
    /// reply traffic for established flows is never blocked.
    pub async fn new(serializer: Serializer, pretend: bool) -> Self {
        let mut state = NetsecState {
            pretend,
            ..Default::default()
        };
        if let Err(err) = run_rule(pretend, &mut state.shadow, conntrack_args(true)).await {
            error!("could not install conntrack bypass: {err}");
        }
        Self {
            state: Mutex::new(state),
            serializer,
        }
    }

    /// Restores persisted state; an absent file yields a wide-open
    /// controller with `pretend = !enable`.
    pub async fn restore(serializer: Serializer, enable: bool) -> Self {
        match serializer.load::<NetsecState>(NETSEC_FILE).await {
            Ok(Some(mut state)) => {
                info!(
                    "restored netsec state: {} denied ips, {} groups, {} containers",
                    state.denied_ips.len(),
                    state.ip_groups.len(),
                    state.containers.len()
                );
                rebuild_shadow(&mut state).await;
                Self {
                    state: Mutex::new(state),
                    serializer,
                }
            }
            Ok(None) => {
                info!("using default network security (wide open)");
                Self::new(serializer, !enable).await
            }
            Err(err) => {
                error!("could not restore netsec state, starting wide open: {err}");
                Self::new(serializer, !enable).await
            }
        }
    }

    /// Replaces the membership of `name`, diffing against the previous
    /// membership and moving blanket denies and per-container allows
    /// accordingly. The conntrack bypass is absent only for the duration of
    /// the update and is restored on every exit path.
    pub async fn update_ip_group(
        &self, name: &str, ips: &[String],
    ) -> Result<(), SupervisorError> {
        let mut st = self.state.lock().await;
        if let Err(err) = run_rule(st.pretend, &mut st.shadow, conntrack_args(false)).await {
            debug!("conntrack bypass was not present: {err}");
        }
        let result = update_locked(&mut st, name, ips).await;
        if let Err(err) = run_rule(st.pretend, &mut st.shadow, conntrack_args(true)).await {
            error!("could not restore conntrack bypass: {err}");
        }
        if result.is_ok() {
            self.persist(&st).await;
        }
        result
    }

    /// Empties the group, then erases the key.
    pub async fn delete_ip_group(&self, name: &str) -> Result<(), SupervisorError> {
        self.update_ip_group(name, &[]).await?;
        let mut st = self.state.lock().await;
        st.ip_groups.remove(name);
        self.persist(&st).await;
        Ok(())
    }

    /// Registers a container's egress policy: resolves its (mark, veth)
    /// from the runtime PID, stamps its traffic, and opens the allowed
    /// (ip, port) pairs above the blanket denies. Partial failure rolls the
    /// registration back.
    pub async fn add_container_security(
        &self, id: &str, pid: i64, sgs: HashMap<String, Vec<u16>>,
    ) -> Result<(), SupervisorError> {
        let mut st = self.state.lock().await;
        if st.containers.contains_key(id) {
            return Err(SupervisorError::AlreadyRegistered(id.to_string()));
        }
        for group in sgs.keys() {
            if !st.ip_groups.contains_key(group) {
                return Err(SupervisorError::UnknownGroup(group.clone()));
            }
        }
        let (mark, veth) = resolve_network_info(pid, st.pretend).await?;
        let contsec = ContainerSecurity {
            id: id.to_string(),
            pid,
            veth,
            mark,
            security_groups: sgs,
        };
        run_rule(
            st.pretend,
            &mut st.shadow,
            mark_veth_args(true, &contsec.veth, &contsec.mark),
        )
        .await?;
        st.containers.insert(id.to_string(), contsec.clone());

        let mut failure = None;
        'rules: for (group, ports) in &contsec.security_groups {
            let ips = st.ip_groups.get(group).cloned().unwrap_or_default();
            for &port in ports {
                for ip in &ips {
                    let args = open_port_args(true, &contsec.mark, ip, port);
                    if let Err(err) = run_rule(st.pretend, &mut st.shadow, args).await {
                        failure = Some(err);
                        break 'rules;
                    }
                }
            }
        }
        if let Some(err) = failure {
            remove_locked(&mut st, id).await;
            self.persist(&st).await;
            return Err(err);
        }
        self.persist(&st).await;
        Ok(())
    }

    /// Deletes the container's mark and allow rules. Unknown ids succeed
    /// silently so teardown stays idempotent.
    pub async fn remove_container_security(&self, id: &str) -> Result<(), SupervisorError> {
        let mut st = self.state.lock().await;
        if !st.containers.contains_key(id) {
            return Ok(());
        }
        remove_locked(&mut st, id).await;
        self.persist(&st).await;
        Ok(())
    }

    pub async fn ip_groups(&self) -> HashMap<String, Vec<String>> {
        self.state.lock().await.ip_groups.clone()
    }

    pub async fn registered_containers(&self) -> Vec<String> {
        self.state.lock().await.containers.keys().cloned().collect()
    }

    pub async fn is_pretend(&self) -> bool {
        self.state.lock().await.pretend
    }

    /// Snapshot of a shadow chain, top rule first. Meaningful only in
    /// pretend mode.
    pub async fn pretend_rules(&self, chain: &str) -> Vec<String> {
        self.state.lock().await.shadow.rules(chain)
    }

    async fn persist(&self, st: &NetsecState) {
        if let Err(err) = self.serializer.save(NETSEC_FILE, st).await {
            error!("could not save netsec state: {err}");
        }
    }
}

async fn update_locked(
    st: &mut NetsecState, name: &str, ips: &[String],
) -> Result<(), SupervisorError> {
    let previous = st.ip_groups.get(name).cloned().unwrap_or_default();
    let incoming: HashSet<&String> = ips.iter().collect();
    let to_remove: Vec<String> = previous
        .iter()
        .filter(|ip| !incoming.contains(*ip))
        .cloned()
        .collect();

    let mut new_ips = Vec::new();
    for ip in ips {
        if st.denied_ips.contains(ip) {
            continue;
        }
        run_rule(st.pretend, &mut st.shadow, blanket_deny_args(true, ip)).await?;
        st.denied_ips.insert(ip.clone());
        new_ips.push(ip.clone());
    }
    for ip in &to_remove {
        if !st.denied_ips.contains(ip) {
            continue;
        }
        if let Err(err) =
            run_rule(st.pretend, &mut st.shadow, blanket_deny_args(false, ip)).await
        {
            error!("could not drop blanket deny for {ip}: {err}");
        }
        st.denied_ips.remove(ip);
    }

    let pretend = st.pretend;
    let NetsecState {
        containers, shadow, ..
    } = st;
    for contsec in containers.values() {
        let Some(ports) = contsec.security_groups.get(name) else {
            continue;
        };
        for &port in ports {
            for ip in &new_ips {
                run_rule(pretend, shadow, open_port_args(true, &contsec.mark, ip, port)).await?;
            }
            for ip in &to_remove {
                let args = open_port_args(false, &contsec.mark, ip, port);
                if let Err(err) = run_rule(pretend, shadow, args).await {
                    error!("could not drop allow for {ip}:{port}: {err}");
                }
            }
        }
    }

    st.ip_groups.insert(name.to_string(), ips.to_vec());
    Ok(())
}

async fn remove_locked(st: &mut NetsecState, id: &str) {
    let Some(contsec) = st.containers.remove(id) else {
        return;
    };
    let args = mark_veth_args(false, &contsec.veth, &contsec.mark);
    if let Err(err) = run_rule(st.pretend, &mut st.shadow, args).await {
        error!("could not drop veth mark for {id}: {err}");
    }
    for (group, ports) in &contsec.security_groups {
        let ips = st.ip_groups.get(group).cloned().unwrap_or_default();
        for &port in ports {
            for ip in &ips {
                let args = open_port_args(false, &contsec.mark, ip, port);
                if let Err(err) = run_rule(st.pretend, &mut st.shadow, args).await {
                    error!("could not drop allow for {ip}:{port}: {err}");
                }
            }
        }
    }
}

/// After a pretend-mode restore the shadow table starts empty; replay the
/// persisted maps into it so rule queries reflect the saved state.
async fn rebuild_shadow(st: &mut NetsecState) {
    if !st.pretend {
        return;
    }
    let _ = run_rule(true, &mut st.shadow, conntrack_args(true)).await;
    for ip in st.denied_ips.clone() {
        let _ = run_rule(true, &mut st.shadow, blanket_deny_args(true, &ip)).await;
    }
    let containers = st.containers.clone();
    for contsec in containers.values() {
        let args = mark_veth_args(true, &contsec.veth, &contsec.mark);
        let _ = run_rule(true, &mut st.shadow, args).await;
        for (group, ports) in &contsec.security_groups {
            let ips = st.ip_groups.get(group).cloned().unwrap_or_default();
            for &port in ports {
                for ip in &ips {
                    let args = open_port_args(true, &contsec.mark, ip, port);
                    let _ = run_rule(true, &mut st.shadow, args).await;
                }
            }
        }
    }
}
