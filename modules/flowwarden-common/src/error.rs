use thiserror::Error;

/// Startup configuration failures. Both variants are fatal: they are raised
/// before the supervisor loop begins and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} environment variable is required")]
    MissingConfiguration { var: &'static str },

    #[error("{var} must be {expected}, got {value:?}")]
    InvalidConfiguration {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl ConfigError {
    /// The environment variable this error is about.
    pub fn var(&self) -> &'static str {
        match self {
            Self::MissingConfiguration { var } => var,
            Self::InvalidConfiguration { var, .. } => var,
        }
    }
}
