use std::path::{
    Path,
    PathBuf,
};

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::utils::error::SupervisorError;

/// JSON object persistence under a single save directory. Every stateful
/// component serializes through one of these so restarts are
/// non-destructive.
#[derive(Debug, Clone)]
pub struct Serializer {
    save_dir: PathBuf,
}

impl Serializer {
    /// Creates the save directory if needed.
    pub async fn new(save_dir: impl AsRef<Path>) -> Result<Self, SupervisorError> {
        let save_dir = save_dir.as_ref().to_path_buf();
        fs::create_dir_all(&save_dir).await?;
        Ok(Self { save_dir })
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Create-truncate-encode the object into `{save_dir}/{file}`.
    pub async fn save<T: Serialize>(&self, file: &str, object: &T) -> Result<(), SupervisorError> {
        let encoded = serde_json::to_vec(object)?;
        fs::write(self.save_dir.join(file), encoded).await?;
        Ok(())
    }

    /// Reads `{save_dir}/{file}` back. An absent file is not an error: it
    /// yields `None` and the caller falls back to its default state.
    pub async fn load<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, SupervisorError> {
        let path = self.save_dir.join(file);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no saved state at {}", path.display());
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}
