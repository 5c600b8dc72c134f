//! Email record storage repository.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};

use super::model::{
    Attachment, AttachmentId, Email, EmailFilter, EmailId, LogEntry,
    LogEntryId, NewAttachment, NewEmail, NewLogEntry,
};
use crate::{Error, Result};

const EMAIL_COLUMNS: &str = "id, from_email, recipients, cc_recipients, bcc_recipients, reply_to, \
     subject, body, html_message, extra_headers, ok, date_sent, error";

const LOG_COLUMNS: &str = "id, email_id, type, timestamp, esp, event_id, reject_reason, \
     mta_response, tags, user_agent, click_url, metadata, raw";

/// Repository for logged emails, their attachments and tracking events.
#[derive(Debug, Clone)]
pub struct EmailRepository {
    pool: SqlitePool,
}

impl EmailRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_email TEXT NOT NULL DEFAULT '',
                recipients TEXT NOT NULL DEFAULT '',
                cc_recipients TEXT NOT NULL DEFAULT '',
                bcc_recipients TEXT NOT NULL DEFAULT '',
                reply_to TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                html_message TEXT NOT NULL DEFAULT '',
                extra_headers TEXT NOT NULL DEFAULT '{}',
                ok INTEGER NOT NULL DEFAULT 0,
                date_sent TEXT NOT NULL,
                error TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS email_attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id INTEGER NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                mimetype TEXT NOT NULL DEFAULT '',
                file TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS email_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id INTEGER NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
                type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                esp TEXT NOT NULL,
                event_id TEXT,
                reject_reason TEXT,
                mta_response TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                user_agent TEXT,
                click_url TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                raw TEXT NOT NULL DEFAULT 'null'
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Indexes for the admin-style listing and for correlation lookups
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_emails_ok ON emails(ok)",
            "CREATE INDEX IF NOT EXISTS idx_emails_date_sent ON emails(date_sent)",
            "CREATE INDEX IF NOT EXISTS idx_emails_anymail_id \
             ON emails(json_extract(extra_headers, '$.anymail_id'))",
            "CREATE INDEX IF NOT EXISTS idx_attachments_email ON email_attachments(email_id)",
            "CREATE INDEX IF NOT EXISTS idx_logs_email_timestamp ON email_logs(email_id, timestamp)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Closes every pooled connection. Later operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Starts a transaction for writing a record together with its attachments.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection is available.
    pub async fn begin(&self) -> Result<EmailTransaction> {
        Ok(EmailTransaction {
            tx: self.pool.begin().await?,
        })
    }

    /// Create an email record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create(&self, email: &NewEmail) -> Result<Email> {
        insert_email(&self.pool, email).await
    }

    /// Set the outcome of a send attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the record does not exist.
    pub async fn set_status(&self, id: EmailId, ok: bool, error: Option<&str>) -> Result<()> {
        let result = sqlx::query(r"UPDATE emails SET ok = ?, error = ? WHERE id = ?")
            .bind(ok)
            .bind(error)
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("email {id}")));
        }
        Ok(())
    }

    /// Get an email by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: EmailId) -> Result<Option<Email>> {
        let sql = format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_email).transpose()
    }

    /// List emails, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self, filter: &EmailFilter) -> Result<Vec<Email>> {
        let mut sql = format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE 1 = 1");
        if filter.ok.is_some() {
            sql.push_str(" AND ok = ?");
        }
        if filter.search.is_some() {
            sql.push_str(
                r" AND (subject LIKE ? ESCAPE '\' OR body LIKE ? ESCAPE '\' OR recipients LIKE ? ESCAPE '\')",
            );
        }
        if filter.since.is_some() {
            sql.push_str(" AND date_sent >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND date_sent < ?");
        }
        sql.push_str(" ORDER BY date_sent DESC, id DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(ok) = filter.ok {
            query = query.bind(ok);
        }
        if let Some(term) = &filter.search {
            let pattern = format!("%{}%", escape_like(term));
            query = query
                .bind(pattern.clone())
                .bind(pattern.clone())
                .bind(pattern);
        }
        if let Some(since) = filter.since {
            query = query.bind(format_timestamp(since));
        }
        if let Some(until) = filter.until {
            query = query.bind(format_timestamp(until));
        }
        if let Some(limit) = filter.limit {
            query = query.bind(i64::from(limit));
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_email).collect()
    }

    /// Count email records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query(r"SELECT COUNT(*) as count FROM emails")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Delete an email together with its attachments and log entries.
    ///
    /// Returns false if no such record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: EmailId) -> Result<bool> {
        let result = sqlx::query(r"DELETE FROM emails WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find the newest email whose extra headers carry the given provider message id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_anymail_id(&self, message_id: &str) -> Result<Option<EmailId>> {
        let row = sqlx::query(
            r"
            SELECT id FROM emails
            WHERE json_extract(extra_headers, '$.anymail_id') = ?
            ORDER BY date_sent DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| EmailId(row.get("id"))))
    }

    /// Record an attachment for an email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the email does not exist.
    pub async fn add_attachment(
        &self,
        email_id: EmailId,
        attachment: &NewAttachment,
    ) -> Result<Attachment> {
        insert_attachment(&self.pool, email_id, attachment).await
    }

    /// Attachments of an email, in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn attachments(&self, email_id: EmailId) -> Result<Vec<Attachment>> {
        let rows = sqlx::query(
            r"
            SELECT id, email_id, name, mimetype, file
            FROM email_attachments
            WHERE email_id = ?
            ORDER BY id
            ",
        )
        .bind(email_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Attachment {
                id: AttachmentId(row.get("id")),
                email_id: EmailId(row.get("email_id")),
                name: row.get("name"),
                mimetype: row.get("mimetype"),
                file: row.get("file"),
            })
            .collect())
    }

    /// Get an attachment by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn attachment(&self, id: AttachmentId) -> Result<Option<Attachment>> {
        let row = sqlx::query(
            r"SELECT id, email_id, name, mimetype, file FROM email_attachments WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Attachment {
            id: AttachmentId(row.get("id")),
            email_id: EmailId(row.get("email_id")),
            name: row.get("name"),
            mimetype: row.get("mimetype"),
            file: row.get("file"),
        }))
    }

    /// Append a tracking log entry to an email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the email does not exist.
    pub async fn add_log(&self, email_id: EmailId, entry: &NewLogEntry) -> Result<LogEntry> {
        let tags = serde_json::to_string(&entry.tags)?;
        let metadata = serde_json::to_string(&entry.metadata)?;
        let raw = serde_json::to_string(&entry.raw)?;

        let result = sqlx::query(
            r"
            INSERT INTO email_logs
                (email_id, type, timestamp, esp, event_id, reject_reason, mta_response,
                 tags, user_agent, click_url, metadata, raw)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(email_id.0)
        .bind(&entry.event_type)
        .bind(format_timestamp(entry.timestamp))
        .bind(&entry.esp)
        .bind(&entry.event_id)
        .bind(&entry.reject_reason)
        .bind(&entry.mta_response)
        .bind(tags)
        .bind(&entry.user_agent)
        .bind(&entry.click_url)
        .bind(metadata)
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(LogEntry {
            id: LogEntryId(result.last_insert_rowid()),
            email_id,
            event_type: entry.event_type.clone(),
            timestamp: entry.timestamp,
            esp: entry.esp.clone(),
            event_id: entry.event_id.clone(),
            reject_reason: entry.reject_reason.clone(),
            mta_response: entry.mta_response.clone(),
            tags: entry.tags.clone(),
            user_agent: entry.user_agent.clone(),
            click_url: entry.click_url.clone(),
            metadata: entry.metadata.clone(),
            raw: entry.raw.clone(),
        })
    }

    /// Log entries of an email, ordered by event time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a stored value is corrupt.
    pub async fn logs(&self, email_id: EmailId) -> Result<Vec<LogEntry>> {
        let sql =
            format!("SELECT {LOG_COLUMNS} FROM email_logs WHERE email_id = ? ORDER BY timestamp, id");
        let rows = sqlx::query(&sql)
            .bind(email_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_log).collect()
    }

    /// Count all log entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_logs(&self) -> Result<i64> {
        let row = sqlx::query(r"SELECT COUNT(*) as count FROM email_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}

/// A record write in progress. Nothing is visible to other readers until [`commit`](Self::commit).
///
/// Dropping the transaction without committing rolls it back.
#[derive(Debug)]
pub struct EmailTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl EmailTransaction {
    /// Create an email record inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create(&mut self, email: &NewEmail) -> Result<Email> {
        insert_email(&mut *self.tx, email).await
    }

    /// Record an attachment inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn add_attachment(
        &mut self,
        email_id: EmailId,
        attachment: &NewAttachment,
    ) -> Result<Attachment> {
        insert_attachment(&mut *self.tx, email_id, attachment).await
    }

    /// Commit everything written.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Discard everything written.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn insert_email<'e, E>(executor: E, email: &NewEmail) -> Result<Email>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let date_sent = Utc::now();
    let extra_headers = serde_json::to_string(&email.extra_headers)?;

    let result = sqlx::query(
        r"
        INSERT INTO emails
            (from_email, recipients, cc_recipients, bcc_recipients, reply_to,
             subject, body, html_message, extra_headers, ok, date_sent)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&email.from_email)
    .bind(&email.recipients)
    .bind(&email.cc_recipients)
    .bind(&email.bcc_recipients)
    .bind(&email.reply_to)
    .bind(&email.subject)
    .bind(&email.body)
    .bind(&email.html_message)
    .bind(extra_headers)
    .bind(email.ok)
    .bind(format_timestamp(date_sent))
    .execute(executor)
    .await?;

    Ok(Email {
        id: EmailId(result.last_insert_rowid()),
        from_email: email.from_email.clone(),
        recipients: email.recipients.clone(),
        cc_recipients: email.cc_recipients.clone(),
        bcc_recipients: email.bcc_recipients.clone(),
        reply_to: email.reply_to.clone(),
        subject: email.subject.clone(),
        body: email.body.clone(),
        html_message: email.html_message.clone(),
        extra_headers: email.extra_headers.clone(),
        ok: email.ok,
        date_sent,
        error: None,
    })
}

async fn insert_attachment<'e, E>(
    executor: E,
    email_id: EmailId,
    attachment: &NewAttachment,
) -> Result<Attachment>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r"INSERT INTO email_attachments (email_id, name, mimetype, file) VALUES (?, ?, ?, ?)",
    )
    .bind(email_id.0)
    .bind(&attachment.name)
    .bind(&attachment.mimetype)
    .bind(&attachment.file)
    .execute(executor)
    .await?;

    Ok(Attachment {
        id: AttachmentId(result.last_insert_rowid()),
        email_id,
        name: attachment.name.clone(),
        mimetype: attachment.mimetype.clone(),
        file: attachment.file.clone(),
    })
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidData(format!("timestamp {value:?}: {e}")))
}

fn escape_like(term: &str) -> String {
    term.replace('\\', r"\\")
        .replace('%', r"\%")
        .replace('_', r"\_")
}

fn row_to_email(row: &SqliteRow) -> Result<Email> {
    let extra_headers: String = row.get("extra_headers");
    let date_sent: String = row.get("date_sent");

    Ok(Email {
        id: EmailId(row.get("id")),
        from_email: row.get("from_email"),
        recipients: row.get("recipients"),
        cc_recipients: row.get("cc_recipients"),
        bcc_recipients: row.get("bcc_recipients"),
        reply_to: row.get("reply_to"),
        subject: row.get("subject"),
        body: row.get("body"),
        html_message: row.get("html_message"),
        extra_headers: serde_json::from_str(&extra_headers)?,
        ok: row.get::<bool, _>("ok"),
        date_sent: parse_timestamp(&date_sent)?,
        error: row.get("error"),
    })
}

fn row_to_log(row: &SqliteRow) -> Result<LogEntry> {
    let timestamp: String = row.get("timestamp");
    let tags: String = row.get("tags");
    let metadata: String = row.get("metadata");
    let raw: String = row.get("raw");

    Ok(LogEntry {
        id: LogEntryId(row.get("id")),
        email_id: EmailId(row.get("email_id")),
        event_type: row.get("type"),
        timestamp: parse_timestamp(&timestamp)?,
        esp: row.get("esp"),
        event_id: row.get("event_id"),
        reject_reason: row.get("reject_reason"),
        mta_response: row.get("mta_response"),
        tags: serde_json::from_str(&tags)?,
        user_agent: row.get("user_agent"),
        click_url: row.get("click_url"),
        metadata: serde_json::from_str(&metadata)?,
        raw: serde_json::from_str(&raw)?,
    })
}
