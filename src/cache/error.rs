use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache configuration for `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },
    #[error("background worker `{worker}` was already started")]
    AlreadyStarted { worker: &'static str },
}

impl CacheError {
    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn already_started(worker: &'static str) -> Self {
        Self::AlreadyStarted { worker }
    }

    /// Qualify a configuration key with the table it was read from.
    pub fn within(self, prefix: &str) -> Self {
        match self {
            Self::InvalidConfig { key, reason } => Self::InvalidConfig {
                key: format!("{prefix}.{key}"),
                reason,
            },
            other => other,
        }
    }
}
