use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("config file not readable: {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("home directory not found: set HOME or pass --config")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, WatchdogError>;
