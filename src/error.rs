//! Resolution error taxonomy.
//!
//! Every variant aborts the current run. Nothing is retried internally; a
//! retry is a fresh run started by the caller.

use std::time::Duration;

use thiserror::Error;

/// Reasons a resolution run failed.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The script is empty, does not parse, throws while being evaluated,
    /// or does not define the entry point.
    #[error("script load error: {0}")]
    ScriptLoad(String),

    /// The entry point threw while handling a request.
    #[error("script runtime error: {message}")]
    ScriptRuntime {
        message: String,
        stack: Option<String>,
    },

    /// The script ran past its wall-clock deadline.
    #[error("script exceeded its {0:?} deadline")]
    ScriptTimeout(Duration),

    /// The script's response broke the wire contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The outbound fetch failed.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The outbound fetch ran past its deadline.
    #[error("fetch exceeded its {0:?} deadline")]
    FetchTimeout(Duration),

    /// The script kept asking for more iterations.
    #[error("script did not finish within {0} iterations")]
    MaxIterationsExceeded(u32),

    /// The caller cancelled the run.
    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Short stable name of the failure class, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScriptLoad(_) => "script_load",
            Self::ScriptRuntime { .. } => "script_runtime",
            Self::ScriptTimeout(_) => "script_timeout",
            Self::Protocol(_) => "protocol",
            Self::Fetch(_) => "fetch",
            Self::FetchTimeout(_) => "fetch_timeout",
            Self::MaxIterationsExceeded(_) => "max_iterations_exceeded",
            Self::Cancelled => "cancelled",
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;
