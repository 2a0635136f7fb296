use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] atlantis_commons::SupervisorError),

    #[error("Could not bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Not Proxying {0}")]
    NotProxying(String),

    #[error("Already Proxying {0} to {1}")]
    AlreadyProxying(String, String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
