use std::error::Error;

use cachegrid_maglev::MaglevError;

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Backend `{backend}` is not mapped to any shard")]
    Routing { backend: String },
    #[error("Storage error: {0}")]
    Storage(Box<dyn Error + Send + Sync + 'static>),
    #[error("Detached task panicked: {0}")]
    TaskPanicked(String),
    #[error("Environment error: {0}")]
    Env(#[from] envconfig::Error),
}

impl ClusterError {
    pub fn storage<E>(error: E) -> ClusterError
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        ClusterError::Storage(error.into())
    }

    pub fn configuration<T: ToString>(msg: T) -> Self {
        Self::Configuration(msg.to_string())
    }
}

impl From<MaglevError> for ClusterError {
    fn from(value: MaglevError) -> Self {
        ClusterError::Configuration(value.to_string())
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
