//! Boundary to the remote-procedure-call layer.
//!
//! The engine never opens sockets itself. Callers supply a [`Transport`] that
//! performs one authenticated call against one endpoint; tests substitute a
//! scripted implementation.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::endpoint::Endpoint;

/// Cooperative cancellation flag shared across workers.
///
/// Once aborted, calls not yet started are skipped; calls already in flight
/// receive the flag through [`CallContext`] and may give up early.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    /// Creates a signal that has not been raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Whether the signal has been raised.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Per-call settings handed to the transport.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Deadline for the whole call.
    pub timeout: Duration,
    /// Invocation-wide cancellation flag.
    pub abort: &'a AbortSignal,
}

/// Error surfaced by a [`Transport`] implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl TransportError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Raw error text, used for classification.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Performs authenticated remote calls against aggregate endpoints.
pub trait Transport: Send + Sync {
    /// Invokes `method` with positional `args` and returns the raw reply.
    fn invoke(
        &self,
        endpoint: &Endpoint,
        method: &str,
        args: &[Value],
        context: &CallContext<'_>,
    ) -> Result<Value, TransportError>;
}
