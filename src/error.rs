//! Error taxonomy for the rule engine.
//!
//! Nothing in this crate ever panics or propagates an error into the request
//! path. These types exist so each layer can match on *why* something failed
//! without string-matching a message, and so `main` has exactly one hard
//! failure mode to bubble up: a missing backend config at startup.

use thiserror::Error;

/// Startup-only. The one error category allowed to abort the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for environment variable {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Backend (redis-compatible store) errors. Every `backend.rs` method returns
/// this; callers that need to "fail open" match on it rather than propagate.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("pool exhausted or connection acquisition timed out")]
    PoolTimeout,

    #[error("failed to build backend connection pool: {0}")]
    PoolCreate(#[from] deadpool_redis::CreatePoolError),

    #[error("backend I/O error: {0}")]
    Io(#[from] redis::RedisError),

    #[error("backend pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

/// Per-file rule document load errors. Always logged and skipped; the
/// registry never fails to start because one file is bad.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as a rule document: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Header-based rule override parse errors (§4.3, §9.1). The whole header is
/// rejected on any one malformed tuple; the caller falls back to the
/// registry-resolved rule list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("rule tuple {0:?} has wrong arity (expected 3 or 4 colon-separated fields)")]
    WrongArity(String),

    #[error("unknown feature name {0:?}")]
    UnknownFeature(String),

    #[error("non-numeric duration in tuple {0:?}")]
    BadDuration(String),

    #[error("non-numeric threshold in tuple {0:?}")]
    BadThreshold(String),

    #[error("non-numeric probability in tuple {0:?}")]
    BadProbability(String),
}
