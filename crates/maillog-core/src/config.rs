//! Email log configuration.
//!
//! A [`Config`] is built once at startup, usually from a JSON file, and
//! handed to the [`EmailBackend`](crate::EmailBackend) and
//! [`EventCorrelator`](crate::EventCorrelator). Every field has a default,
//! so a partial file only overrides what it names.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::record::Email;
use crate::transport::TransportKind;
use crate::{Error, Result};

/// Application directory name under the platform config/data dirs.
const APP_DIR: &str = "maillog";

/// Function computing the stored path of an attachment from its record and filename.
pub type AttachmentPathFn = dyn Fn(&Email, &str) -> String + Send + Sync;

/// Where attachment content is placed inside the content store.
#[derive(Clone, Default)]
pub enum AttachmentsPath {
    /// Use the attachment filename as-is.
    #[default]
    Default,
    /// Prefix the filename with a directory.
    Prefix(String),
    /// Compute the path from the owning record and the filename.
    Custom(Arc<AttachmentPathFn>),
}

impl AttachmentsPath {
    /// Wraps a path function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Email, &str) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Resolves the stored path for `filename` belonging to `email`.
    ///
    /// A prefix is joined to the filename with exactly one `/`. Custom
    /// functions are used verbatim.
    #[must_use]
    pub fn resolve(&self, email: &Email, filename: &str) -> String {
        match self {
            Self::Default => filename.to_string(),
            Self::Prefix(prefix) if prefix.is_empty() => filename.to_string(),
            Self::Prefix(prefix) if prefix.ends_with('/') => format!("{prefix}{filename}"),
            Self::Prefix(prefix) => format!("{prefix}/{filename}"),
            Self::Custom(f) => f(email, filename),
        }
    }
}

impl fmt::Debug for AttachmentsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl Serialize for AttachmentsPath {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Prefix(prefix) => serializer.serialize_str(prefix),
            Self::Default | Self::Custom(_) => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for AttachmentsPath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let prefix = Option::<String>::deserialize(deserializer)?;
        Ok(match prefix {
            Some(prefix) if !prefix.is_empty() => Self::Prefix(prefix),
            _ => Self::Default,
        })
    }
}

/// Email log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The real transport messages are delegated to.
    pub backend: TransportKind,
    /// Whether the built transport swallows its own failures.
    pub fail_silently: bool,
    /// Whether attachment content is persisted next to each record.
    pub save_attachments: bool,
    /// Placement of attachment content in the content store.
    pub attachments_path: AttachmentsPath,
    /// Whether provider callbacks are recorded at all.
    pub connect_tracking: bool,
    /// SQLite database file; defaults under the platform data dir.
    pub database_path: Option<PathBuf>,
    /// Root directory for attachment content; defaults under the platform data dir.
    pub storage_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: TransportKind::default(),
            fail_silently: false,
            save_attachments: false,
            attachments_path: AttachmentsPath::Default,
            connect_tracking: true,
            database_path: None,
            storage_root: None,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Loads settings from a JSON file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json(&contents)
    }

    /// Parses settings from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or has wrongly typed fields.
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Database file to open.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_dir().join("maillog.db"))
    }

    /// Directory attachment content is stored under.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .unwrap_or_else(|| data_dir().join("attachments"))
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::EmailId;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn email() -> Email {
        Email {
            id: EmailId(7),
            from_email: "from@example.com".to_string(),
            recipients: "to@example.com".to_string(),
            cc_recipients: String::new(),
            bcc_recipients: String::new(),
            reply_to: String::new(),
            subject: "Subject".to_string(),
            body: "Body".to_string(),
            html_message: String::new(),
            extra_headers: BTreeMap::new(),
            ok: false,
            date_sent: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, TransportKind::Console);
        assert!(!config.save_attachments);
        assert!(config.connect_tracking);
        assert!(matches!(config.attachments_path, AttachmentsPath::Default));
    }

    #[test]
    fn test_partial_json_falls_through_to_defaults() {
        let config =
            Config::from_json(r#"{"save_attachments": true, "attachments_path": "files"}"#)
                .unwrap();
        assert!(config.save_attachments);
        assert!(config.connect_tracking);
        assert_eq!(config.backend, TransportKind::Console);
        assert_eq!(config.attachments_path.resolve(&email(), "a.txt"), "files/a.txt");
    }

    #[test]
    fn test_backend_kind_from_json() {
        let config = Config::from_json(r#"{"backend": "memory", "fail_silently": true}"#).unwrap();
        assert_eq!(config.backend, TransportKind::Memory);
        assert!(config.fail_silently);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = Config::from_json(r#"{"save_attachments": "yes"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_attachment_path_prefix_single_separator() {
        let email = email();
        assert_eq!(AttachmentsPath::Default.resolve(&email, "f.txt"), "f.txt");
        assert_eq!(
            AttachmentsPath::Prefix("testfiles".into()).resolve(&email, "f.txt"),
            "testfiles/f.txt"
        );
        assert_eq!(
            AttachmentsPath::Prefix("testfiles/".into()).resolve(&email, "f.txt"),
            "testfiles/f.txt"
        );
        assert_eq!(AttachmentsPath::Prefix(String::new()).resolve(&email, "f.txt"), "f.txt");
    }

    #[test]
    fn test_attachment_path_custom_is_verbatim() {
        let path = AttachmentsPath::custom(|email, name| format!("emails/{}/{name}", email.id));
        assert_eq!(path.resolve(&email(), "f.txt"), "emails/7/f.txt");
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).await.unwrap();
        assert!(!config.save_attachments);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"connect_tracking": false, "database_path": "/tmp/x.db"}"#)
            .await
            .unwrap();

        let config = Config::load(&path).await.unwrap();
        assert!(!config.connect_tracking);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/x.db"));
    }
}
