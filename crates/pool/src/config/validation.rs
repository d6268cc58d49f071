use super::types::{BackendConfig, PoolConfig};
use crate::error::PoolError;

impl PoolConfig {
    /// Validate ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.validate_max_workers()?;
        self.validate_backend()?;
        Ok(())
    }

    fn validate_max_workers(&self) -> Result<(), PoolError> {
        if self.max_workers == Some(0) {
            return Err(PoolError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_backend(&self) -> Result<(), PoolError> {
        match &self.backend {
            BackendConfig::Thread => Ok(()),
            BackendConfig::Process { binary, .. } if binary.as_os_str().is_empty() => Err(
                PoolError::Config("process backend requires a worker binary".to_string()),
            ),
            BackendConfig::Process { .. } => Ok(()),
        }
    }
}
