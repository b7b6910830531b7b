//! Error types and result handling for mq-redirect.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use mq_redirect::{Error, Result};
//!
//! fn lookup(producer_id: &str) -> Result<()> {
//!     Err(Error::HandleNotFound(producer_id.to_string()))
//! }
//!
//! match lookup("GID-ORDERS") {
//!     Ok(()) => println!("found"),
//!     Err(Error::HandleNotFound(id)) => eprintln!("no handle for {}", id),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for mq-redirect operations.
///
/// Configuration errors (`IdentifierNotFound`, `HandleNotFound`,
/// `UnrecognizedCallShape`) are never retried. Backend errors come from the
/// broker client and are surfaced to synchronous and transactional callers.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file or environment override could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// No `GID-` entry of the properties bundle matches the topic.
    #[error("No producer identifier found for topic '{topic}' in properties {properties}")]
    IdentifierNotFound {
        /// Topic the lookup was made for
        topic: String,
        /// Dump of the full properties bundle
        properties: String,
    },

    /// The registry holds no handle for this producer identifier.
    #[error("No producer handle registered for '{0}'")]
    HandleNotFound(String),

    /// A raw call did not match any known call shape.
    #[error("Unrecognized call shape: {operation} with {argc} argument(s)")]
    UnrecognizedCallShape {
        /// Operation name as invoked
        operation: String,
        /// Number of positional arguments
        argc: usize,
    },

    /// A client for this group is already running in this process.
    #[error("Group '{0}' is already started in this process")]
    GroupAlreadyStarted(String),

    /// Any other failure while constructing or starting a client.
    #[error("Failed to start client for group '{group}': {message}")]
    Startup {
        /// Group the client was bound to
        group: String,
        /// Description of the failure
        message: String,
    },

    /// The client was used before `start` succeeded or after `shutdown`.
    #[error("Client for group '{0}' is not started")]
    NotStarted(String),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Backend failure not covered by the Kafka client error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The delivery report was dropped before completion.
    #[error("Delivery canceled before completion")]
    DeliveryCanceled,

    /// The registry was used after it was shut down.
    #[error("Redirected clients are shut down")]
    Shutdown,
}

impl Error {
    /// Whether the error is a configuration error in the sense of the
    /// redirection contract (never retried).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::IdentifierNotFound { .. }
                | Error::HandleNotFound(_)
                | Error::UnrecognizedCallShape { .. }
                | Error::Config(_)
        )
    }
}

/// A convenient Result type alias for mq-redirect operations.
///
/// This is equivalent to `std::result::Result<T, mq_redirect::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
