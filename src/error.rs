//! The error taxonomy shared by every stage.
//!
//! Mirrors the taxonomy of the design: configuration errors are fatal at
//! startup, transient errors cause a batch to be re-queued and retried next
//! tick, invalid/corrupt data is logged and dropped, and only a permanently
//! unreachable coordinator store is fatal once running.

use std::fmt;

/// An error that can occur anywhere in the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration problem detected at startup: a missing working
    /// directory, a malformed feed descriptor, two descriptors sharing a
    /// `source`, or an unknown parser identifier.
    #[error("configuration error: {0}")]
    Config(String),

    /// A transient failure talking to an upstream dependency (feed host,
    /// IP-to-ASN history service, or the queue/durable store). The caller
    /// should re-queue whatever it was processing and retry on the next
    /// tick.
    #[error("transient error: {0}")]
    Transient(String),

    /// The coordinator store is permanently unreachable. Fatal: the worker
    /// exits and is expected to be restarted by supervision.
    #[error("coordinator store unreachable: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transient(msg: impl fmt::Display) -> Self {
        Error::Transient(msg.to_string())
    }

    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    pub fn fatal(msg: impl fmt::Display) -> Self {
        Error::Fatal(msg.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        // Any Redis-protocol failure is treated as transient by callers that
        // can re-queue; the coordinator promotes "unreachable" specifically
        // to Fatal itself (see coordinator::shutdown_requested).
        Error::Transient(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transient(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transient(err.to_string())
    }
}
