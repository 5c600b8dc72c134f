//! `maillog` - inspect and feed the outgoing email log
//!
//! This tool opens the database named by the configuration file and provides:
//! - Listing and searching logged emails
//! - Viewing one email with its attachments and tracking events
//! - Sending a message through the logging backend
//! - Ingesting provider tracking events from JSON
//! - Exporting stored attachments

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maillog_core::{
    AttachmentId, Config, Email, EmailFilter, EmailId, EmailLog, OutgoingMessage, TrackingEvent,
};

/// Inspect and feed the outgoing email log
#[derive(Parser, Debug)]
#[command(name = "maillog")]
#[command(about = "Inspect and feed the outgoing email log", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List logged emails, newest first
    List {
        /// Only successfully sent emails
        #[arg(long, conflicts_with = "failed")]
        ok: bool,

        /// Only failed or unconfirmed emails
        #[arg(long)]
        failed: bool,

        /// Match subject, body or recipients
        #[arg(long)]
        search: Option<String>,

        /// Only emails sent at or after this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_time)]
        since: Option<DateTime<Utc>>,

        /// Only emails sent before this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_time)]
        until: Option<DateTime<Utc>>,

        /// Maximum number of emails
        #[arg(long, default_value = "50")]
        limit: u32,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
    /// Show one email with its attachments and tracking events
    Show {
        /// Email ID
        id: i64,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
    /// Send a message through the configured backend
    Send {
        /// Sender address
        #[arg(long)]
        from: String,

        /// Recipient address (repeatable)
        #[arg(long, required = true)]
        to: Vec<String>,

        /// CC address (repeatable)
        #[arg(long)]
        cc: Vec<String>,

        /// BCC address (repeatable)
        #[arg(long)]
        bcc: Vec<String>,

        /// Reply-To address (repeatable)
        #[arg(long)]
        reply_to: Vec<String>,

        /// Subject line
        #[arg(long, default_value = "")]
        subject: String,

        /// Plain text body
        #[arg(long, default_value = "")]
        body: String,

        /// HTML alternative body
        #[arg(long)]
        html: Option<String>,

        /// File to attach (repeatable)
        #[arg(long)]
        attach: Vec<PathBuf>,
    },
    /// Record provider tracking events from a JSON file (one event or an array)
    Track {
        /// Reporting provider name
        #[arg(long)]
        esp: String,

        /// JSON file with events
        file: PathBuf,
    },
    /// Write a stored attachment to a file
    Attachment {
        /// Attachment ID
        id: i64,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Delete an email with its attachments and tracking events
    Delete {
        /// Email ID
        id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maillog=info,maillog_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let log = EmailLog::open(config)
        .await
        .context("Failed to open email log")?;

    match cli.command {
        Commands::List {
            ok,
            failed,
            search,
            since,
            until,
            limit,
            format,
        } => {
            let mut filter = EmailFilter::all().limit(limit);
            if ok {
                filter = filter.ok(true);
            } else if failed {
                filter = filter.ok(false);
            }
            if let Some(term) = search {
                filter = filter.search(term);
            }
            if let Some(since) = since {
                filter = filter.since(since);
            }
            if let Some(until) = until {
                filter = filter.until(until);
            }
            cmd_list(&log, &filter, format).await?;
        }
        Commands::Show { id, format } => cmd_show(&log, EmailId(id), format).await?,
        Commands::Send {
            from,
            to,
            cc,
            bcc,
            reply_to,
            subject,
            body,
            html,
            attach,
        } => {
            let mut message = OutgoingMessage::new(from, subject, body);
            message.to = to;
            message.cc = cc;
            message.bcc = bcc;
            message.reply_to = reply_to;
            if let Some(html) = html {
                message = message.alternative(html, "text/html");
            }
            for path in &attach {
                message = attach_file(message, path).await?;
            }
            cmd_send(&log, message).await?;
        }
        Commands::Track { esp, file } => cmd_track(&log, &esp, &file).await?,
        Commands::Attachment { id, output } => {
            cmd_attachment(&log, AttachmentId(id), &output).await?;
        }
        Commands::Delete { id } => {
            if !log.delete_email(EmailId(id)).await? {
                bail!("Email {id} not found");
            }
            println!("Deleted email {id}");
        }
    }

    Ok(())
}

/// Accepts a full RFC 3339 timestamp or a date, read as midnight UTC.
fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|_| format!("expected RFC 3339 time or YYYY-MM-DD, got {value:?}"))
}

async fn cmd_list(log: &EmailLog, filter: &EmailFilter, format: Format) -> anyhow::Result<()> {
    let emails = log.repository().list(filter).await?;

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&emails)?);
        return Ok(());
    }

    if emails.is_empty() {
        println!("No emails");
        return Ok(());
    }

    println!("{:<8} {:<4} {:<25} {}", "ID", "OK", "SENT", "EMAIL");
    for email in &emails {
        println!(
            "{:<8} {:<4} {:<25} {email}",
            email.id,
            if email.ok { "yes" } else { "no" },
            email.date_sent.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

async fn cmd_show(log: &EmailLog, id: EmailId, format: Format) -> anyhow::Result<()> {
    let Some(email) = log.repository().get(id).await? else {
        bail!("Email {id} not found");
    };
    let attachments = log.repository().attachments(id).await?;
    let logs = log.repository().logs(id).await?;

    if format == Format::Json {
        let document = serde_json::json!({
            "email": email,
            "attachments": attachments,
            "logs": logs,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    print_email(&email);

    if !attachments.is_empty() {
        println!("\nAttachments:");
        for attachment in &attachments {
            let mimetype = if attachment.mimetype.is_empty() {
                "-"
            } else {
                attachment.mimetype.as_str()
            };
            println!("  [{}] {attachment} ({mimetype}) -> {}", attachment.id, attachment.file);
        }
    }

    if !logs.is_empty() {
        println!("\nEvents:");
        for entry in &logs {
            print!(
                "  {} {:<12} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.event_type,
                entry.esp
            );
            if let Some(reason) = &entry.reject_reason {
                print!(" reject={reason}");
            }
            if let Some(url) = &entry.click_url {
                print!(" url={url}");
            }
            println!();
        }
    }
    Ok(())
}

fn print_email(email: &Email) {
    println!("Email {}", email.id);
    println!("  From:     {}", email.from_email);
    println!("  To:       {}", email.recipients);
    if !email.cc_recipients.is_empty() {
        println!("  Cc:       {}", email.cc_recipients);
    }
    if !email.bcc_recipients.is_empty() {
        println!("  Bcc:      {}", email.bcc_recipients);
    }
    if !email.reply_to.is_empty() {
        println!("  Reply-To: {}", email.reply_to);
    }
    println!("  Subject:  {}", email.subject);
    println!("  Sent:     {}", email.date_sent.to_rfc3339());
    println!("  Status:   {}", if email.ok { "sent" } else { "failed" });
    if let Some(error) = &email.error {
        println!("  Error:    {error}");
    }
    for (name, value) in &email.extra_headers {
        println!("  {name}: {value}");
    }
    println!("\n{}", email.body);
}

async fn attach_file(message: OutgoingMessage, path: &Path) -> anyhow::Result<OutgoingMessage> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("No usable file name in {}", path.display()))?;
    Ok(message.attach(filename, content, None))
}

async fn cmd_send(log: &EmailLog, message: OutgoingMessage) -> anyhow::Result<()> {
    let backend = log.configured_backend();
    let sent = backend
        .send_messages(std::slice::from_ref(&message))
        .await
        .context("Transport failed")?;
    info!(sent, "Send finished");
    println!("Sent {sent} message(s)");
    Ok(())
}

async fn cmd_track(log: &EmailLog, esp: &str, file: &Path) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid JSON in {}", file.display()))?;

    let events: Vec<TrackingEvent> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };

    let correlator = log.correlator();
    if !correlator.is_connected() {
        println!("Tracking is disabled in the configuration; nothing recorded");
        return Ok(());
    }

    let mut recorded = 0;
    for event in &events {
        if correlator.handle_tracking_event(esp, event).await?.is_some() {
            recorded += 1;
        }
    }
    println!(
        "Recorded {recorded} of {} event(s); {} unmatched",
        events.len(),
        events.len() - recorded
    );
    Ok(())
}

async fn cmd_attachment(log: &EmailLog, id: AttachmentId, output: &Path) -> anyhow::Result<()> {
    let (attachment, content) = log
        .read_attachment(id)
        .await
        .with_context(|| format!("Failed to read attachment {id}"))?;
    tokio::fs::write(output, &content)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Wrote {} ({} bytes) to {}",
        attachment.name,
        content.len(),
        output.display()
    );
    Ok(())
}
