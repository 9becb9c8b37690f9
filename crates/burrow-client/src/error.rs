//! Error types for proxy management

use crate::event::EventType;
use crate::status::ProxyPhase;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;

/// Failure to enqueue a message onto the outgoing control queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("Outgoing message queue is full")]
    Full,

    #[error("Outgoing message queue is closed")]
    Closed,
}

impl<T> From<TrySendError<T>> for SinkError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        }
    }
}

/// Proxy management errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Proxy [{0}] not found")]
    NotFound(String),

    #[error("Payload does not match event type {event_type}")]
    InvalidPayloadType { event_type: EventType },

    #[error("Failed to enqueue control message: {0}")]
    SinkFault(#[from] SinkError),

    /// Error string reported by the server for this proxy
    #[error("{0}")]
    ServerRejected(String),

    #[error("Proxy [{name}] is {phase}, ignoring start response")]
    InvalidPhase { name: String, phase: ProxyPhase },

    #[error("Proxy manager is closed")]
    Closed,
}
