//! Integration tests for the email log.
//!
//! These drive the public API end to end: a backend over an in-memory or
//! on-disk database, test transports, and provider callbacks.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use maillog_core::{
    Config, EmailFilter, EmailLog, EmailRepository, MemoryStorage, MemoryTransport,
    OutgoingMessage, SendStatus, TrackingEvent, Transport, TransportError,
};

/// Transport that always fails, honoring `fail_silently` like a real one.
struct BrokenTransport {
    fail_silently: bool,
}

#[async_trait]
impl Transport for BrokenTransport {
    async fn send_messages(&self, _messages: &[OutgoingMessage]) -> Result<usize, TransportError> {
        if self.fail_silently {
            Ok(0)
        } else {
            Err(TransportError::Send("mailbox unavailable".to_string()))
        }
    }
}

async fn memory_log(config: Config) -> EmailLog {
    let repository = EmailRepository::in_memory().await.unwrap();
    EmailLog::with_parts(config, repository, Arc::new(MemoryStorage::new()))
}

fn scenario_message() -> OutgoingMessage {
    OutgoingMessage::new("a@x.com", "S", "B").to("b@x.com")
}

#[tokio::test]
async fn test_send_one_message_records_success() {
    let log = memory_log(Config::default()).await;
    let backend = log.backend(Arc::new(MemoryTransport::new()));

    assert_eq!(backend.send_messages(&[scenario_message()]).await.unwrap(), 1);

    let emails = log.repository().list(&EmailFilter::all()).await.unwrap();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].from_email, "a@x.com");
    assert_eq!(emails[0].recipients, "b@x.com");
    assert_eq!(emails[0].subject, "S");
    assert_eq!(emails[0].body, "B");
    assert!(emails[0].ok);
}

#[tokio::test]
async fn test_failing_transport_propagates_and_records_failure() {
    let log = memory_log(Config::default()).await;
    let backend = log.backend(Arc::new(BrokenTransport {
        fail_silently: false,
    }));

    let err = backend
        .send_messages(&[scenario_message()])
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Send("mailbox unavailable".to_string()));

    let emails = log.repository().list(&EmailFilter::all()).await.unwrap();
    assert_eq!(emails.len(), 1);
    assert!(!emails[0].ok);
    assert_eq!(
        emails[0].error.as_deref(),
        Some("Send failed: mailbox unavailable")
    );
}

#[tokio::test]
async fn test_silent_failure_returns_zero_and_records_failure() {
    let log = memory_log(Config::default()).await;
    let backend = log.backend(Arc::new(BrokenTransport {
        fail_silently: true,
    }));

    assert_eq!(backend.send_messages(&[scenario_message()]).await.unwrap(), 0);

    let failed = log
        .repository()
        .list(&EmailFilter::all().ok(false))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn test_batch_records_join_addresses_in_order() {
    let log = memory_log(Config::default()).await;
    let transport = Arc::new(MemoryTransport::new());
    let backend = log.backend(transport.clone());

    let batch = vec![
        OutgoingMessage::new("from@example.com", "First", "1")
            .to("one@example.com")
            .to("two@example.com")
            .cc("cc@example.com"),
        OutgoingMessage::new("from@example.com", "Second", "2")
            .to("three@example.com")
            .bcc("b1@example.com")
            .bcc("b2@example.com")
            .reply_to("reply@example.com"),
    ];

    assert_eq!(backend.send_messages(&batch).await.unwrap(), 2);
    assert_eq!(transport.outbox(), batch);

    let mut emails = log.repository().list(&EmailFilter::all()).await.unwrap();
    emails.reverse();
    assert_eq!(emails.len(), 2);
    assert!(emails.iter().all(|e| e.ok));
    assert_eq!(emails[0].recipients, "one@example.com; two@example.com");
    assert_eq!(emails[0].cc_recipients, "cc@example.com");
    assert_eq!(emails[1].recipients, "three@example.com");
    assert_eq!(emails[1].bcc_recipients, "b1@example.com; b2@example.com");
    assert_eq!(emails[1].reply_to, "reply@example.com");
}

#[tokio::test]
async fn test_attachment_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        save_attachments: true,
        attachments_path: maillog_core::AttachmentsPath::Prefix("testfiles/".to_string()),
        database_path: Some(dir.path().join("maillog.db")),
        storage_root: Some(dir.path().join("attachments")),
        ..Config::default()
    };
    let log = EmailLog::open(config).await.unwrap();
    let backend = log.backend(Arc::new(MemoryTransport::new()));

    let payload = vec![0_u8, 159, 146, 150, 255];
    let message = scenario_message()
        .attach("f.txt", b"data".to_vec(), Some("text/plain"))
        .attach("blob.bin", payload.clone(), Some("application/octet-stream"));
    backend.send_messages(&[message]).await.unwrap();

    let email = &log.repository().list(&EmailFilter::all()).await.unwrap()[0];
    let attachments = log.repository().attachments(email.id).await.unwrap();
    assert_eq!(attachments.len(), 2);

    assert_eq!(attachments[0].name, "f.txt");
    assert_eq!(attachments[0].mimetype, "text/plain");
    assert_eq!(attachments[0].file, "testfiles/f.txt");
    let (_, content) = log.read_attachment(attachments[0].id).await.unwrap();
    assert_eq!(content, b"data");

    assert_eq!(attachments[1].mimetype, "");
    let (_, content) = log.read_attachment(attachments[1].id).await.unwrap();
    assert_eq!(content, payload);
}

#[tokio::test]
async fn test_same_filename_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        save_attachments: true,
        database_path: Some(dir.path().join("maillog.db")),
        storage_root: Some(dir.path().join("attachments")),
        ..Config::default()
    };
    let log = EmailLog::open(config).await.unwrap();
    let backend = log.backend(Arc::new(MemoryTransport::new()));

    let first = scenario_message().attach("report.pdf", b"one".to_vec(), None);
    let second = scenario_message().attach("report.pdf", b"two".to_vec(), None);
    backend.send_messages(&[first, second]).await.unwrap();

    let emails = log.repository().list(&EmailFilter::all()).await.unwrap();
    let mut contents = Vec::new();
    for email in &emails {
        for attachment in log.repository().attachments(email.id).await.unwrap() {
            assert_eq!(attachment.name, "report.pdf");
            contents.push(log.read_attachment(attachment.id).await.unwrap().1);
        }
    }
    contents.sort();
    assert_eq!(contents, vec![b"one".to_vec(), b"two".to_vec()]);
}

#[tokio::test]
async fn test_tracking_event_attaches_to_sent_email() {
    let log = memory_log(Config::default()).await;
    let correlator = log.correlator();

    let email = correlator
        .log_successful_email("SendGrid", &scenario_message(), &SendStatus::new("42"))
        .await
        .unwrap()
        .unwrap();

    let mut event = TrackingEvent::new("open", "42");
    event.timestamp = Some(Utc::now());
    event.esp_event = serde_json::json!({"event": "open", "sg_message_id": "42"});
    correlator
        .handle_tracking_event("SendGrid", &event)
        .await
        .unwrap();

    let logs = log.repository().logs(email.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event_type, "open");
    assert_eq!(logs[0].esp, "SendGrid");
    assert_eq!(logs[0].raw["sg_message_id"], "42");

    let stored = log.repository().get(email.id).await.unwrap().unwrap();
    assert_eq!(stored.anymail_id(), Some("42"));
    assert!(stored.ok);
}

#[tokio::test]
async fn test_tracking_events_keep_time_order() {
    let log = memory_log(Config::default()).await;
    let correlator = log.correlator();
    let email = correlator
        .log_successful_email("Mailgun", &scenario_message(), &SendStatus::new("m-1"))
        .await
        .unwrap()
        .unwrap();

    let now = Utc::now();
    for (event_type, offset) in [("clicked", 20), ("delivered", 0), ("opened", 10)] {
        let mut event = TrackingEvent::new(event_type, "m-1");
        event.timestamp = Some(now + Duration::seconds(offset));
        correlator
            .handle_tracking_event("Mailgun", &event)
            .await
            .unwrap();
    }

    let types: Vec<String> = log
        .repository()
        .logs(email.id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.event_type)
        .collect();
    assert_eq!(types, vec!["delivered", "opened", "clicked"]);
}

#[tokio::test]
async fn test_unmatched_event_leaves_log_table_unchanged() {
    let log = memory_log(Config::default()).await;
    let correlator = log.correlator();
    correlator
        .log_successful_email("Mailgun", &scenario_message(), &SendStatus::new("known"))
        .await
        .unwrap();

    let before = log.repository().count_logs().await.unwrap();
    for _ in 0..3 {
        let entry = correlator
            .handle_tracking_event("Mailgun", &TrackingEvent::new("bounced", "unknown"))
            .await
            .unwrap();
        assert!(entry.is_none());
    }
    assert_eq!(log.repository().count_logs().await.unwrap(), before);
}

#[tokio::test]
async fn test_delete_removes_children() {
    let log = memory_log(Config {
        save_attachments: true,
        ..Config::default()
    })
    .await;
    let correlator = log.correlator();
    let message = scenario_message().attach("f.txt", b"data".to_vec(), None);
    let email = correlator
        .log_successful_email("Postmark", &message, &SendStatus::new("p-1"))
        .await
        .unwrap()
        .unwrap();
    correlator
        .handle_tracking_event("Postmark", &TrackingEvent::new("delivered", "p-1"))
        .await
        .unwrap();

    assert!(log.delete_email(email.id).await.unwrap());
    assert_eq!(log.repository().count().await.unwrap(), 0);
    assert_eq!(log.repository().count_logs().await.unwrap(), 0);
    assert!(log.repository().attachments(email.id).await.unwrap().is_empty());
}
