use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Tcp,
    Http,
}

/// Configuration of one proxy listener, keyed by `local_addr` in the proxy
/// map. `num_handlers` and `max_pending` only apply to TCP proxies; zero
/// means "use the fleet default".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    pub local_addr: String,
    pub remote_addr: String,
    #[serde(default)]
    pub num_handlers: usize,
    #[serde(default)]
    pub max_pending: usize,
}

impl ProxyConfig {
    pub fn tcp(local_addr: &str, remote_addr: &str) -> Self {
        Self {
            kind: ProxyKind::Tcp,
            local_addr: local_addr.to_string(),
            remote_addr: remote_addr.to_string(),
            num_handlers: 0,
            max_pending: 0,
        }
    }

    pub fn http(local_addr: &str, remote_addr: &str) -> Self {
        Self {
            kind: ProxyKind::Http,
            local_addr: local_addr.to_string(),
            remote_addr: remote_addr.to_string(),
            num_handlers: 0,
            max_pending: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_lowercase() {
        let cfg = ProxyConfig::tcp(":80", "remote:80");
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"type\":\"tcp\""));

        let back: ProxyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
