//! Error types for the event-processing core.
//!
//! Every variant carries the name of the component that produced it so
//! upper layers can discriminate without parsing messages. The hot path
//! (pipeline, processors, listeners) absorbs errors locally; only
//! startup, storage shutdown, and block verification surface them.

use thiserror::Error;

/// Main error type for core operations.
#[derive(Debug, Error)]
pub enum SiemError {
    /// Filesystem or socket I/O failure.
    #[error("{component}: io: {source}")]
    Io {
        /// Component that performed the operation
        component: &'static str,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// SQLite-level failure from one of the storage engines.
    #[error("{component}: sqlite: {source}")]
    Sqlite {
        /// Component that owns the connection
        component: &'static str,
        /// Underlying SQLite error
        #[source]
        source: rusqlite::Error,
    },

    /// JSON encode/decode failure.
    #[error("{component}: serialization: {source}")]
    Serde {
        /// Component that attempted the conversion
        component: &'static str,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// A unit of work that cannot be parsed; the unit is dropped, the
    /// batch survives.
    #[error("{component}: malformed input: {detail}")]
    Malformed {
        /// Component that rejected the input
        component: &'static str,
        /// Identifier and reason for the rejected unit
        detail: String,
    },

    /// Invalid or unusable configuration. Fatal at startup.
    #[error("config: {0}")]
    Config(String),

    /// Signature or chain verification failure. Surfaced to the
    /// verifier, never auto-remediated.
    #[error("{component}: integrity violation: {detail}")]
    Integrity {
        /// Component that detected the violation
        component: &'static str,
        /// What failed to verify
        detail: String,
    },

    /// Errors collected while shutting a component down.
    #[error("{component}: shutdown: {details}")]
    Shutdown {
        /// Component being closed
        component: &'static str,
        /// Joined error messages, in close order
        details: String,
    },
}

impl SiemError {
    pub(crate) fn io(component: &'static str, source: std::io::Error) -> Self {
        Self::Io { component, source }
    }

    pub(crate) fn sqlite(component: &'static str, source: rusqlite::Error) -> Self {
        Self::Sqlite { component, source }
    }

    pub(crate) fn serde(component: &'static str, source: serde_json::Error) -> Self {
        Self::Serde { component, source }
    }

    pub(crate) fn malformed(component: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            component,
            detail: detail.into(),
        }
    }

    pub(crate) fn integrity(component: &'static str, detail: impl Into<String>) -> Self {
        Self::Integrity {
            component,
            detail: detail.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SiemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_their_component() {
        let err = SiemError::malformed("detection", "rule r1: bad condition");
        assert_eq!(
            err.to_string(),
            "detection: malformed input: rule r1: bad condition"
        );

        let err = SiemError::integrity("forensics", "signature verification failed");
        assert!(err.to_string().starts_with("forensics:"));
    }
}
