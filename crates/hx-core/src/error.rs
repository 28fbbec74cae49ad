#[derive(Debug, thiserror::Error)]
pub enum HaxigonError {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("invalid application name '{0}'")]
    InvalidName(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("termination failed: {0}")]
    Termination(String),

    #[error("port allocation failed: {0}")]
    PortAllocation(String),

    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("orchestrator is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, HaxigonError>;
