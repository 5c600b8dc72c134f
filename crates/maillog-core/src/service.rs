//! Wiring for applications.
//!
//! [`EmailLog`] opens the database and content store named by a [`Config`]
//! and hands out backends and correlators sharing them.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::EmailBackend;
use crate::config::Config;
use crate::record::{Attachment, AttachmentId, EmailId, EmailRepository};
use crate::storage::{ContentStore, FileSystemStorage};
use crate::tracking::EventCorrelator;
use crate::transport::Transport;
use crate::{Error, Result};

/// An opened email log.
#[derive(Clone)]
pub struct EmailLog {
    config: Arc<Config>,
    repository: EmailRepository,
    storage: Arc<dyn ContentStore>,
}

impl EmailLog {
    /// Opens the database and attachment directory named by `config`,
    /// creating them if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or the database cannot be opened.
    pub async fn open(config: Config) -> Result<Self> {
        let database_path = config.database_path();
        if let Some(parent) = database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let storage_root = config.storage_root();
        let repository = EmailRepository::new(&database_path).await?;
        info!(
            database = %database_path.display(),
            attachments = %storage_root.display(),
            "Opened email log"
        );

        Ok(Self::with_parts(
            config,
            repository,
            Arc::new(FileSystemStorage::new(storage_root)),
        ))
    }

    /// Builds a log from already opened parts.
    #[must_use]
    pub fn with_parts(
        config: Config,
        repository: EmailRepository,
        storage: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            repository,
            storage,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The record repository.
    #[must_use]
    pub const fn repository(&self) -> &EmailRepository {
        &self.repository
    }

    /// A backend wrapping `transport`.
    #[must_use]
    pub fn backend(&self, transport: Arc<dyn Transport>) -> EmailBackend {
        EmailBackend::new(
            Arc::clone(&self.config),
            self.repository.clone(),
            Arc::clone(&self.storage),
            transport,
        )
    }

    /// A backend wrapping the transport named in the configuration.
    #[must_use]
    pub fn configured_backend(&self) -> EmailBackend {
        self.backend(self.config.backend.build(self.config.fail_silently))
    }

    /// A correlator for provider callbacks.
    #[must_use]
    pub fn correlator(&self) -> EventCorrelator {
        EventCorrelator::new(
            Arc::clone(&self.config),
            self.repository.clone(),
            Arc::clone(&self.storage),
        )
    }

    /// Reads an attachment and its stored content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the attachment or its content is missing.
    pub async fn read_attachment(&self, id: AttachmentId) -> Result<(Attachment, Vec<u8>)> {
        let attachment = self
            .repository
            .attachment(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("attachment {id}")))?;
        let content = self.storage.open(&attachment.file).await?;
        Ok((attachment, content))
    }

    /// Deletes an email with its log entries, attachments and their content.
    ///
    /// Returns false if no such email existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database delete fails.
    pub async fn delete_email(&self, id: EmailId) -> Result<bool> {
        let attachments = self.repository.attachments(id).await?;
        if !self.repository.delete(id).await? {
            return Ok(false);
        }

        for attachment in &attachments {
            if let Err(e) = self.storage.delete(&attachment.file).await {
                warn!(error = %e, file = %attachment.file, "Failed to delete attachment content");
            }
        }
        debug!(email_id = %id, attachments = attachments.len(), "Deleted email");
        Ok(true)
    }
}
