//! Mail transports.
//!
//! A [`Transport`] is whatever actually delivers mail. The
//! [`EmailBackend`](crate::EmailBackend) wraps one and never changes its
//! results. The built-in transports cover local use; applications plug in
//! their real delivery mechanism by implementing the trait.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::message::OutgoingMessage;

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection to the delivery service failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Send failed.
    #[error("Send failed: {0}")]
    Send(String),
}

/// Something that delivers a batch of messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the messages and returns how many were accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails and the transport is not
    /// configured to fail silently.
    async fn send_messages(&self, messages: &[OutgoingMessage]) -> Result<usize, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_messages(&self, messages: &[OutgoingMessage]) -> Result<usize, TransportError> {
        self.as_ref().send_messages(messages).await
    }
}

/// Identifier of a built-in transport, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Print each rendered message to standard output.
    #[default]
    Console,
    /// Keep messages in an in-process outbox.
    Memory,
    /// Accept and discard.
    Dummy,
}

impl TransportKind {
    /// Builds the transport.
    #[must_use]
    pub fn build(self, fail_silently: bool) -> Arc<dyn Transport> {
        match self {
            Self::Console => Arc::new(ConsoleTransport::new(fail_silently)),
            Self::Memory => Arc::new(MemoryTransport::new()),
            Self::Dummy => Arc::new(DummyTransport),
        }
    }
}

/// Writes each message in RFC 5322 form to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleTransport {
    fail_silently: bool,
}

impl ConsoleTransport {
    /// Creates a console transport.
    #[must_use]
    pub const fn new(fail_silently: bool) -> Self {
        Self { fail_silently }
    }

    async fn write_all(messages: &[OutgoingMessage]) -> std::io::Result<usize> {
        let separator = "-".repeat(79);
        let mut stdout = tokio::io::stdout();
        for message in messages {
            stdout.write_all(&message.to_rfc5322()).await?;
            stdout.write_all(b"\n").await?;
            stdout.write_all(separator.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await?;
        Ok(messages.len())
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_messages(&self, messages: &[OutgoingMessage]) -> Result<usize, TransportError> {
        match Self::write_all(messages).await {
            Ok(sent) => Ok(sent),
            Err(_) if self.fail_silently => Ok(0),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}

/// Collects messages in memory instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    outbox: Arc<Mutex<Vec<OutgoingMessage>>>,
}

impl MemoryTransport {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    #[must_use]
    pub fn outbox(&self) -> Vec<OutgoingMessage> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of messages sent so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has been sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_messages(&self, messages: &[OutgoingMessage]) -> Result<usize, TransportError> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(messages);
        Ok(messages.len())
    }
}

/// Reports every message as sent without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyTransport;

#[async_trait]
impl Transport for DummyTransport {
    async fn send_messages(&self, messages: &[OutgoingMessage]) -> Result<usize, TransportError> {
        Ok(messages.len())
    }
}
