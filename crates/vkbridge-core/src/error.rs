#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("handle not found: {0}")]
    HandleNotFound(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("backend {selected} already selected, cannot switch to {requested}")]
    BackendAlreadySelected { selected: String, requested: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
