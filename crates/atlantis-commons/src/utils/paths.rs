use std::path::PathBuf;

/// Host-side log directory bind-mounted into the container.
pub fn host_log_dir(container_id: &str) -> PathBuf {
    PathBuf::from(format!("/var/log/atlantis/containers/{container_id}"))
}

/// Host-side config directory bind-mounted into the container.
pub fn host_config_dir(container_id: &str) -> PathBuf {
    PathBuf::from(format!("/etc/atlantis/containers/{container_id}"))
}

/// The app config written into the config directory during deploy.
pub fn host_config_file(container_id: &str) -> PathBuf {
    host_config_dir(container_id).join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_lives_inside_config_dir() {
        assert_eq!(
            host_config_file("app-1"),
            PathBuf::from("/etc/atlantis/containers/app-1/config.json")
        );
        assert!(host_config_file("app-1").starts_with(host_config_dir("app-1")));
    }
}
