use thiserror::Error;

/// Errors surfaced by the localization core.
///
/// Invalid poses (walls, off-map positions) are handled internally by bounded
/// retry loops; only an exhausted retry budget escalates to `FatalMap`.
#[derive(Error, Debug)]
pub enum LocalizationError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Map is unnavigable: {operation} failed after {attempts} attempts")]
    FatalMap {
        operation: &'static str,
        attempts: usize,
    },

    #[error("Engine has been stopped")]
    Stopped,

    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing failed: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, LocalizationError>;
